use crate::config::ReplicaLockConfig;
use crate::error::Result;
use log::debug;

/// Prints how many replicas the store reports, i.e. the quorum every
/// acquisition must reach.
pub struct ReplicasCommand<'a> {
    config: &'a ReplicaLockConfig,
}

impl<'a> ReplicasCommand<'a> {
    pub fn new(config: &'a ReplicaLockConfig) -> Result<Self> {
        Ok(Self { config })
    }

    pub fn execute(&self) -> Result<()> {
        let engine = self.config.open_engine()?;
        let count = engine.replica_count()?;
        debug!("Store at {} reports {count} replicas", self.config.store.url);
        println!("{count}");
        Ok(())
    }
}
