//! Basic example of using the transactional cache.

use cortado::cluster::LoggingEventListener;
use cortado::testing::TestCluster;
use cortado::{CacheConfig, InvocationOptions, StripedLock, TransactionalCache, Xid};
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter("cortado=debug,info")
        .init();

    // Create configuration for node 1
    let config = CacheConfig::new(1)
        .with_concurrency_level(16)
        .with_lock_acquisition_timeout(Duration::from_millis(500))
        .with_default_lifespan(Duration::from_secs(3600));

    println!("Starting cache node 1...");
    let cache = TransactionalCache::new(config)?;
    let opts = InvocationOptions::default();

    println!("\n--- Non-transactional Operations ---");
    cache.put("user:1", "Alice", &opts)?;
    cache.put("user:2", "Bob", &opts)?;
    println!("user:1 = {:?}", cache.get(b"user:1", &opts)?);
    println!("removed user:2 = {:?}", cache.remove(b"user:2", &opts)?);

    println!("\n--- Transaction ---");
    let mut tx = cache.begin(Xid::new(1, b"demo-tx".to_vec(), Vec::new()))?;
    cache.tx_put(&mut tx, "user:1", "Alice Smith", &opts)?;
    cache.tx_put(&mut tx, "user:3", "Carol", &opts)?;
    println!("inside tx, user:1 = {:?}", cache.tx_get(&mut tx, b"user:1", &opts)?);
    println!("outside tx, user:1 = {:?}", cache.get(b"user:1", &opts)?);
    cache.commit(&mut tx)?;
    println!("after commit, user:1 = {:?}", cache.get(b"user:1", &opts)?);
    println!("transaction metrics: {:?}", cache.transaction_metrics());

    println!("\n--- Striped Locks ---");
    let locks = StripedLock::new(5);
    let key = "21321321321321321";
    println!("{key} -> stripe {}", locks.stripe_for(key));
    {
        let _guard = locks.lock(key, true, Duration::ZERO)?;
        println!("write locked: {}", locks.is_write_locked(key));
    }
    println!("write locked after scope: {}", locks.is_write_locked(key));

    println!("\n--- Three Nodes over Loopback ---");
    let cluster = TestCluster::new(3, 1)?;
    if let Some(remote_key) = cluster.key_owned_only_by(2) {
        if let Some(origin) = cluster.node(1) {
            let mut tx = origin.begin(Xid::new(1, b"remote-tx".to_vec(), Vec::new()))?;
            origin.tx_put(&mut tx, remote_key.clone(), "stored on node 2", &opts)?;
            origin.commit(&mut tx)?;
        }
        if let Some(owner) = cluster.node(2) {
            println!("node 2 holds {:?}", owner.get(&remote_key, &opts)?);
        }
    }
    println!("messages exchanged: {}", cluster.network.message_count());

    if let Some(survivor) = cluster.node(1) {
        survivor.add_listener(Arc::new(LoggingEventListener));
    }
    cluster.install_view(&[1, 2]);

    println!("\nCache stats: {:?}", cache.stats());
    cache.stop()?;
    Ok(())
}
