use crate::config::ReplicaLockConfig;
use crate::error::Result;
use colored::Colorize;

pub struct ForceReleaseCommand<'a> {
    config: &'a ReplicaLockConfig,
}

impl<'a> ForceReleaseCommand<'a> {
    pub fn new(config: &'a ReplicaLockConfig) -> Result<Self> {
        Ok(Self { config })
    }

    pub fn execute(&self) -> Result<()> {
        let engine = self.config.open_engine()?;
        let raw_name = engine.raw_name().to_string();

        if engine.force_release()? {
            println!("{} lock '{raw_name}'", "Force-released".yellow().bold());
        } else {
            println!("Lock '{raw_name}' was not held");
        }
        Ok(())
    }
}
