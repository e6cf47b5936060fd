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

//! Component D: the routing hint table.
//!
//! A process-wide `metric path -> backends that admitted to holding it` map, written after every
//! successful find merge and consulted by the render handler to scope its fan-out. No eviction,
//! no TTL -- operators restart the proxy on topology change, and the working set is bounded by
//! the distinct metric names actually queried.

use crate::fanout::Backend;
use fnv::FnvHashMap;
use parking_lot::RwLock;
use std::collections::HashMap;

pub struct RoutingHintTable {
    inner: RwLock<FnvHashMap<String, Vec<Backend>>>,
}

impl RoutingHintTable {
    pub fn new() -> Self { RoutingHintTable { inner: RwLock::new(FnvHashMap::default()) } }

    /// Replaces the stored backend list for each given metric path.
    ///
    /// Each key is rewritten as a whole under the exclusive lock, so a concurrent reader always
    /// sees either the entire previous list or the entire new one -- never a partial update.
    pub fn update(&self, paths: HashMap<String, Vec<Backend>>) {
        let mut table = self.inner.write();
        for (path, backends) in paths {
            table.insert(path, backends);
        }
    }

    /// Returns the known backends for `metric_path`, if any have been observed.
    ///
    /// An absent or empty result means "fan out to everyone" to the caller -- both a warm-up
    /// path for never-before-seen metrics and a fallback if this entry was never populated.
    pub fn lookup(&self, metric_path: &str) -> Option<Vec<Backend>> {
        let table = self.inner.read();
        table.get(metric_path).cloned().filter(|backends| !backends.is_empty())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize { self.inner.read().len() }
}

impl Default for RoutingHintTable {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_metric_has_no_hint() {
        let table = RoutingHintTable::new();
        assert_eq!(table.lookup("a.b"), None);
    }

    #[test]
    fn update_then_lookup_round_trips() {
        let table = RoutingHintTable::new();
        let mut paths = HashMap::new();
        paths.insert("a.b".to_owned(), vec!["http://a".to_owned()]);
        table.update(paths);

        assert_eq!(table.lookup("a.b"), Some(vec!["http://a".to_owned()]));
        assert_eq!(table.lookup("q.r"), None);
    }

    #[test]
    fn update_replaces_whole_entry() {
        let table = RoutingHintTable::new();
        let mut first = HashMap::new();
        first.insert("a.b".to_owned(), vec!["http://a".to_owned()]);
        table.update(first);

        let mut second = HashMap::new();
        second.insert("a.b".to_owned(), vec!["http://a".to_owned(), "http://c".to_owned()]);
        table.update(second);

        assert_eq!(table.lookup("a.b"), Some(vec!["http://a".to_owned(), "http://c".to_owned()]));
    }

    #[test]
    fn no_eviction_table_only_grows() {
        let table = RoutingHintTable::new();
        for i in 0..16 {
            let mut paths = HashMap::new();
            paths.insert(format!("metric.{}", i), vec!["http://a".to_owned()]);
            table.update(paths);
        }
        assert_eq!(table.len(), 16);
    }
}
