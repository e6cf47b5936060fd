// Copyright (c) 2018 Nuclear Furnace
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.
use std::fmt;

/// Errors that can occur while building the process out of its configuration.
#[derive(Debug)]
pub enum CreationError {
    InvalidParameter(String),
    InvalidResource(String),
    Io(std::io::Error),
}

impl fmt::Display for CreationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreationError::InvalidParameter(s) => write!(f, "invalid parameter: {}", s),
            CreationError::InvalidResource(s) => write!(f, "invalid resource: {}", s),
            CreationError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for CreationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CreationError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CreationError {
    fn from(e: std::io::Error) -> Self { CreationError::Io(e) }
}

/// Errors surfaced while decoding a backend's wire payload.
///
/// These never propagate past the merger that produced them: a decode failure means the
/// originating response is dropped and the merge continues with whatever else came back.
#[derive(Debug)]
pub enum DecodeError {
    /// The payload could not be parsed under the active codec at all.
    Malformed(String),
    /// The payload parsed, but didn't have the shape the merger expected (object-graph codec
    /// only -- the binary codec's schema check folds this into `Malformed`).
    UnexpectedShape(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Malformed(s) => write!(f, "malformed payload: {}", s),
            DecodeError::UnexpectedShape(s) => write!(f, "unexpected payload shape: {}", s),
        }
    }
}

impl std::error::Error for DecodeError {}

/// The handful of ways a query handler can fail in a way the client needs to see.
#[derive(Debug)]
pub enum HandlerError {
    /// Every backend we asked came back with nothing usable.
    NoBackendsResponded,
    /// The object-graph codec found a response that didn't even have the right shape to
    /// validate field-by-field; this aborts the whole merge rather than limping along.
    StructuralMismatch(String),
    /// `target` was missing or empty on a render request.
    MissingTarget,
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::NoBackendsResponded => write!(f, "error querying backends"),
            HandlerError::StructuralMismatch(s) => write!(f, "malformed backend response: {}", s),
            HandlerError::MissingTarget => write!(f, "missing target"),
        }
    }
}

impl std::error::Error for HandlerError {}

impl warp::reject::Reject for HandlerError {}
