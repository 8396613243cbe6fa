use crate::config::ReplicaLockConfig;
use crate::error::{ReplicaLockError, Result};
use crate::locking::{CancellationToken, LoggingObserver, TimeUnit, global_token, renewal_interval};
use colored::Colorize;
use log::{debug, info};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Signal-driven cancellation is only observed between slices.
const HOLD_SLICE: Duration = Duration::from_millis(100);

/// Flags of `replica-lock hold`; unset values fall back to configuration.
#[derive(Debug, Clone, Default)]
pub struct HoldOptions {
    pub wait: Option<i64>,
    pub timeout: Option<i64>,
    pub lease: Option<i64>,
    pub unit: Option<String>,
    pub duration: Option<i64>,
    pub renew: bool,
}

pub struct HoldCommand<'a> {
    config: &'a ReplicaLockConfig,
}

impl<'a> HoldCommand<'a> {
    pub fn new(config: &'a ReplicaLockConfig) -> Result<Self> {
        Ok(Self { config })
    }

    pub fn execute(&self, options: &HoldOptions) -> Result<()> {
        self.execute_with_cancellation(options, &global_token())
    }

    pub fn execute_with_cancellation(
        &self,
        options: &HoldOptions,
        cancellation: &CancellationToken,
    ) -> Result<()> {
        let lock_config = &self.config.lock;
        let unit_name = options.unit.as_deref().unwrap_or(&lock_config.unit);
        let unit: TimeUnit = unit_name.parse()?;
        let timeout = options.timeout.unwrap_or(lock_config.timeout);
        let lease = options.lease.unwrap_or(lock_config.lease_time);
        let hold_for = options
            .duration
            .map(|duration| Duration::from_millis(unit.to_millis(duration) as u64));

        let mut engine = self
            .config
            .open_engine()?
            .with_observer(Arc::new(LoggingObserver));
        if options.renew {
            engine.set_renewal(true);
        }
        let raw_name = engine.raw_name().to_string();

        let started = Instant::now();
        let handle = match options.wait {
            Some(wait) => engine
                .try_lock(wait, timeout, lease, unit_name)?
                .ok_or_else(|| ReplicaLockError::NotAcquired {
                    raw_name: raw_name.clone(),
                    waited_ms: started.elapsed().as_millis(),
                })?,
            None => engine.lock(timeout, lease, unit_name)?,
        };

        println!(
            "{} lock '{raw_name}' as {}",
            "Acquired".green().bold(),
            handle.token()
        );
        if handle.watchdog().is_some() {
            println!(
                "  lease renewal every {}ms",
                renewal_interval(handle.lease_ms()).as_millis()
            );
        }

        if hold_until(cancellation, hold_for) {
            info!("Interrupted; releasing lock '{raw_name}'");
        }

        let outcome = engine.release(handle)?;
        println!("{} lock '{raw_name}' ({outcome})", "Released".green().bold());
        Ok(())
    }
}

/// Blocks until `hold_for` elapses (forever when `None`) or cancellation.
/// Returns whether the hold was cancelled.
fn hold_until(cancellation: &CancellationToken, hold_for: Option<Duration>) -> bool {
    let started = Instant::now();
    loop {
        let slice = match hold_for {
            Some(total) => {
                let remaining = total.saturating_sub(started.elapsed());
                if remaining.is_zero() {
                    debug!("Hold duration elapsed");
                    return false;
                }
                remaining.min(HOLD_SLICE)
            }
            None => HOLD_SLICE,
        };
        if cancellation.wait_timeout(slice) {
            return true;
        }
    }
}
