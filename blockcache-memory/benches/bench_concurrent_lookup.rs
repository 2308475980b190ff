// Copyright 2026 blockcache Project Authors
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

//! micro benchmark for concurrent lookups on the block cache

use std::time::{Duration, Instant};

use blockcache_memory::{Cache, CacheBuilder, LookupHint};
use rand::{rngs::SmallRng, Rng, SeedableRng};

const KEYS: u64 = 100_000;
const VALUE_SIZE: usize = 64;
const THREADS: usize = 8;
const DURATION: Duration = Duration::from_secs(5);

/*
cargo bench --bench bench_concurrent_lookup
*/

fn populate(cache: &Cache) {
    for key in 0..KEYS {
        let mut pending = cache.allocate(&key.to_be_bytes(), VALUE_SIZE, 1usize).unwrap();
        pending.value_mut().fill(key as u8);
        cache.insert(pending);
    }
}

fn lookups(cache: Cache, seed: u64) -> (usize, usize) {
    let mut rng = SmallRng::seed_from_u64(seed);
    let (mut hit, mut total) = (0, 0);
    let start = Instant::now();
    while start.elapsed() < DURATION {
        for _ in 0..1024 {
            let key = rng.random_range(0..KEYS * 2);
            if cache.lookup(&key.to_be_bytes(), LookupHint::Normal).is_some() {
                hit += 1;
            }
            total += 1;
        }
    }
    (hit, total)
}

fn bench(shards: usize) {
    let cache = CacheBuilder::new(KEYS as usize).with_shards(shards).build().unwrap();
    populate(&cache);

    let handles = (0..THREADS)
        .map(|i| {
            let cache = cache.clone();
            std::thread::spawn(move || lookups(cache, i as u64))
        })
        .collect::<Vec<_>>();

    let (mut hit, mut total) = (0, 0);
    for handle in handles {
        let (h, t) = handle.join().unwrap();
        hit += h;
        total += t;
    }

    println!(
        "{:10}{:15.0}{:14.2}%",
        shards,
        total as f64 / DURATION.as_secs_f64(),
        hit as f64 / total as f64 * 100.0
    );
}

fn main() {
    println!("{:>10}{:>15}{:>15}", "shards", "lookups/s", "hit ratio");
    for shards in [1, 4, 16, 64] {
        bench(shards);
    }
}
