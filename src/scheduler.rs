//! Resource-request gateway.
//!
//! The control loop talks to the external resource manager through
//! `ResourceGateway`. Requests are fire-and-forget; the loop only looks at
//! the granted level to tell whether escalation is still possible.
//!
//! `AffinityScheduler` maps operating levels onto CPU affinity of the
//! control thread. `NullScheduler` never grants anything.

use crate::error::SchedulerError;
use serde::{Deserialize, Serialize};
use std::io;
use tracing::{debug, info, warn};

/// Narrow interface to the resource manager.
pub trait ResourceGateway {
    /// Bound the levels that may be granted to `0..=upper`.
    fn set_constraint(&mut self, upper: u8) -> Result<(), SchedulerError>;

    /// Signal that more resources are needed. Never blocks.
    fn request_more_resources(&mut self, magnitude: u8);

    /// Level currently granted to the process.
    fn current_granted_level(&self) -> u8;

    /// Upper bound of the active constraint.
    fn max_level(&self) -> u8;

    /// Highest upper bound `set_constraint` accepts.
    fn level_limit(&self) -> u8;

    fn name(&self) -> &'static str;

    /// Widen the constraint by one level. Returns the new bound, or `None`
    /// when already at the limit.
    fn raise_constraint(&mut self) -> Result<Option<u8>, SchedulerError> {
        let upper = self.max_level();
        if upper >= self.level_limit() {
            return Ok(None);
        }
        self.set_constraint(upper + 1)?;
        Ok(Some(upper + 1))
    }

    /// Narrow the constraint by one level. Returns the new bound, or `None`
    /// when already at 0.
    fn lower_constraint(&mut self) -> Result<Option<u8>, SchedulerError> {
        let upper = self.max_level();
        if upper == 0 {
            return Ok(None);
        }
        self.set_constraint(upper - 1)?;
        Ok(Some(upper - 1))
    }
}

impl<G: ResourceGateway + ?Sized> ResourceGateway for Box<G> {
    fn set_constraint(&mut self, upper: u8) -> Result<(), SchedulerError> {
        (**self).set_constraint(upper)
    }

    fn request_more_resources(&mut self, magnitude: u8) {
        (**self).request_more_resources(magnitude)
    }

    fn current_granted_level(&self) -> u8 {
        (**self).current_granted_level()
    }

    fn max_level(&self) -> u8 {
        (**self).max_level()
    }

    fn level_limit(&self) -> u8 {
        (**self).level_limit()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Gateway selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    /// Grant levels as CPU affinity of the control thread.
    #[default]
    Affinity,
    /// Never grant anything.
    None,
}

/// Build the gateway for `kind`, falling back to `NullScheduler` when CPU
/// affinity is not available.
pub fn build_gateway(kind: SchedulerKind, start: u8, limit: u8) -> Box<dyn ResourceGateway + Send> {
    match kind {
        SchedulerKind::None => Box::new(NullScheduler::new(start, limit)),
        SchedulerKind::Affinity => match AffinityScheduler::new(start, limit) {
            Ok(scheduler) => Box::new(scheduler),
            Err(e) => {
                warn!("{}, requests will not be granted", e);
                Box::new(NullScheduler::new(start, limit))
            }
        },
    }
}

/// Number of CPUs granted at `level` out of `0..=limit`.
///
/// The top level always gets every CPU and level 0 at least one.
pub fn cpus_for_level(ncpu: usize, level: u8, limit: u8) -> usize {
    let tiers = usize::from(limit) + 1;
    let level = usize::from(level.min(limit)) + 1;
    ((ncpu * level + tiers - 1) / tiers).clamp(1, ncpu.max(1))
}

type Pinner = fn(&[usize]) -> Result<(), SchedulerError>;

/// Grants levels by widening the CPU affinity of the calling thread.
///
/// Affinity is per thread, so every method must be called from the control
/// thread. Nothing is pinned until the first `set_constraint`.
pub struct AffinityScheduler {
    cpus: Vec<usize>,
    granted: u8,
    upper: u8,
    limit: u8,
    pin: Pinner,
}

impl AffinityScheduler {
    /// Create a scheduler over the CPUs the process may currently run on.
    pub fn new(start: u8, limit: u8) -> Result<Self, SchedulerError> {
        let cpus = allowed_cpus().map_err(SchedulerError::Unavailable)?;
        Ok(Self::with_cpus(cpus, start, limit, pin_cpus))
    }

    fn with_cpus(cpus: Vec<usize>, start: u8, limit: u8, pin: Pinner) -> Self {
        info!(
            cpus = cpus.len(),
            start = start,
            limit = limit,
            "CPU affinity scheduler ready"
        );
        Self {
            cpus,
            granted: start.min(limit),
            upper: limit,
            limit,
            pin,
        }
    }

    /// CPUs granted at the current level.
    pub fn granted_cpus(&self) -> &[usize] {
        let count = cpus_for_level(self.cpus.len(), self.granted, self.limit);
        &self.cpus[..count.min(self.cpus.len())]
    }

    fn grant(&mut self, level: u8) -> Result<(), SchedulerError> {
        let count = cpus_for_level(self.cpus.len(), level, self.limit);
        (self.pin)(&self.cpus[..count.min(self.cpus.len())])?;
        self.granted = level;
        Ok(())
    }
}

impl ResourceGateway for AffinityScheduler {
    fn set_constraint(&mut self, upper: u8) -> Result<(), SchedulerError> {
        if upper > self.limit {
            return Err(SchedulerError::InvalidConstraint {
                requested: upper,
                max: self.limit,
            });
        }
        self.upper = upper;
        let level = self.granted.min(upper);
        self.grant(level)?;
        info!(
            upper = upper,
            granted = level,
            "Resource constraint set to [0-{}]",
            upper
        );
        Ok(())
    }

    fn request_more_resources(&mut self, magnitude: u8) {
        if self.granted >= self.upper {
            debug!(magnitude = magnitude, "Request ignored, already at the constraint");
            return;
        }
        let level = self.granted + 1;
        match self.grant(level) {
            Ok(()) => info!(
                magnitude = magnitude,
                level = level,
                cpus = self.granted_cpus().len(),
                "Granted level {}",
                level
            ),
            Err(e) => warn!(magnitude = magnitude, "Resource request not granted: {}", e),
        }
    }

    fn current_granted_level(&self) -> u8 {
        self.granted
    }

    fn max_level(&self) -> u8 {
        self.upper
    }

    fn level_limit(&self) -> u8 {
        self.limit
    }

    fn name(&self) -> &'static str {
        "affinity"
    }
}

/// Gateway that accepts constraints but never grants a request.
pub struct NullScheduler {
    start: u8,
    upper: u8,
    limit: u8,
}

impl NullScheduler {
    pub fn new(start: u8, limit: u8) -> Self {
        Self {
            start: start.min(limit),
            upper: limit,
            limit,
        }
    }
}

impl ResourceGateway for NullScheduler {
    fn set_constraint(&mut self, upper: u8) -> Result<(), SchedulerError> {
        if upper > self.limit {
            return Err(SchedulerError::InvalidConstraint {
                requested: upper,
                max: self.limit,
            });
        }
        self.upper = upper;
        Ok(())
    }

    fn request_more_resources(&mut self, magnitude: u8) {
        debug!(magnitude = magnitude, "Resource request dropped by null scheduler");
    }

    fn current_granted_level(&self) -> u8 {
        self.start.min(self.upper)
    }

    fn max_level(&self) -> u8 {
        self.upper
    }

    fn level_limit(&self) -> u8 {
        self.limit
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

#[cfg(target_os = "linux")]
fn allowed_cpus() -> io::Result<Vec<usize>> {
    // SAFETY: cpu_set_t is plain data and the size passed matches the buffer.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        if libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set) != 0 {
            return Err(io::Error::last_os_error());
        }
        let cpus: Vec<usize> = (0..libc::CPU_SETSIZE as usize)
            .filter(|&cpu| libc::CPU_ISSET(cpu, &set))
            .collect();
        if cpus.is_empty() {
            return Err(io::Error::new(io::ErrorKind::Other, "empty CPU set"));
        }
        Ok(cpus)
    }
}

#[cfg(not(target_os = "linux"))]
fn allowed_cpus() -> io::Result<Vec<usize>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "sched_getaffinity is Linux only",
    ))
}

#[cfg(target_os = "linux")]
fn pin_cpus(cpus: &[usize]) -> Result<(), SchedulerError> {
    // SAFETY: as above; CPU_SET only touches indices below CPU_SETSIZE.
    let rc = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        for &cpu in cpus {
            libc::CPU_SET(cpu, &mut set);
        }
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };
    if rc != 0 {
        return Err(SchedulerError::AffinityFailed {
            cpus: cpus.len(),
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn pin_cpus(cpus: &[usize]) -> Result<(), SchedulerError> {
    Err(SchedulerError::AffinityFailed {
        cpus: cpus.len(),
        source: io::Error::new(io::ErrorKind::Unsupported, "sched_setaffinity is Linux only"),
    })
}
