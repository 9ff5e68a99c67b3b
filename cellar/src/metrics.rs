// Copyright 2025 cellar Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

macro_rules! for_all_counters {
    ($macro:ident) => {
        $macro! {
            /// successful inserts without replaces
            insert,
            /// successful replaces
            replace,
            /// get hits
            hit,
            /// get misses
            miss,
            /// successful removes
            remove,
            /// evicts by the replacement policy
            evict,
            /// puts rejected because the entry exceeds the maximum entry size
            reject_too_large,
            /// puts rejected because eviction could not free enough space
            reject_no_capacity,
            /// blocks handed back to the allocator on the last dereference
            release,
        }
    };
}

macro_rules! def_metrics {
    ($( $(#[$meta:meta])* $name:ident, )*) => {
        /// Operation counters for one cache instance.
        ///
        /// Counters only advance while enabled; toggling never loses or tears
        /// in-flight increments, it only gates future ones.
        #[derive(Debug)]
        pub struct Metrics {
            enabled: AtomicBool,
            $( $name: AtomicU64, )*
        }

        /// A point-in-time copy of the counters.
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub struct MetricsSnapshot {
            $(
                $(#[$meta])*
                pub $name: u64,
            )*
        }

        impl Metrics {
            pub(crate) fn new(enabled: bool) -> Self {
                Self {
                    enabled: AtomicBool::new(enabled),
                    $( $name: AtomicU64::new(0), )*
                }
            }

            $(
                pub(crate) fn $name(&self) {
                    if self.is_enabled() {
                        self.$name.fetch_add(1, Ordering::Relaxed);
                    }
                }
            )*

            /// Whether counting is enabled.
            pub fn is_enabled(&self) -> bool {
                self.enabled.load(Ordering::Relaxed)
            }

            /// Enable or disable counting.
            pub fn set_enabled(&self, enabled: bool) {
                self.enabled.store(enabled, Ordering::Relaxed);
            }

            /// Clear all counters.
            pub fn reset(&self) {
                $( self.$name.store(0, Ordering::Relaxed); )*
            }

            /// Copy out the current counter values.
            pub fn snapshot(&self) -> MetricsSnapshot {
                MetricsSnapshot {
                    $( $name: self.$name.load(Ordering::Relaxed), )*
                }
            }
        }
    };
}

for_all_counters! { def_metrics }
