use fibmap::{Error, FibConfig, FibMap};

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

fn main() -> Result<(), Error> {
    const NUM_THREADS: usize = 64;
    const NUM_KEYS: u32 = 64;

    let keep_running = Arc::new(AtomicBool::new(true));
    let map = Arc::new(FibMap::with_config(FibConfig::new(2, 2)?));
    let threads: Vec<_> = (0..NUM_THREADS)
        .map(|i| {
            let keep_running = keep_running.clone();
            let map = map.clone();

            thread::spawn(move || {
                let mut key = i as u32 % NUM_KEYS;

                while keep_running.load(Ordering::Relaxed) {
                    if map.insert(key, key).is_some() {
                        map.remove(&key);
                    }

                    key = (key + 1) % NUM_KEYS;
                }
            })
        })
        .collect();

    thread::sleep(Duration::from_secs(5));
    keep_running.store(false, Ordering::Relaxed);

    let results = threads.into_iter().map(|t| t.join());

    for result in results.into_iter() {
        assert!(result.is_ok());
    }

    assert_eq!(map.len(), map.count());

    Ok(())
}
