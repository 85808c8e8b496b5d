// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Drone Pool Manager
//!
//! Capability-typed pools of leaf execution drones. Allocation serves idle
//! drones first, spawns on demand within pool and global limits, and
//! otherwise parks the request in a priority queue until a drone returns or
//! the wait budget expires. Returning drones are health-screened and recycled
//! when their record degrades.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use aegis_swarm_core::domain::config::PoolManagerConfig;
use aegis_swarm_core::domain::drone::{
    Drone, DroneId, DroneStatus, PoolConfig, PoolError, PoolId, PoolStatus, TaskReport,
};
use aegis_swarm_core::domain::events::DroneEvent;
use aegis_swarm_core::domain::task::ResourceFootprint;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::infrastructure::EventBus;

/// One parked allocation request.
struct Waiter {
    ticket: u64,
    required: BTreeSet<String>,
    priority: u8,
    hints: Option<ResourceFootprint>,
    tx: oneshot::Sender<Drone>,
}

pub struct DronePoolManager {
    pools: RwLock<HashMap<PoolId, PoolConfig>>,
    drones: RwLock<HashMap<DroneId, Drone>>,
    waiters: Mutex<Vec<Waiter>>,
    next_ticket: AtomicU64,
    events: EventBus,
    config: PoolManagerConfig,
}

impl DronePoolManager {
    pub fn new(events: EventBus, config: PoolManagerConfig) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            drones: RwLock::new(HashMap::new()),
            waiters: Mutex::new(Vec::new()),
            next_ticket: AtomicU64::new(0),
            events,
            config,
        }
    }

    /// Register a pool and pre-warm it to `min_size` (bounded by the global
    /// drone limit).
    pub fn create_pool(&self, config: PoolConfig) -> Result<PoolId, PoolError> {
        if config.min_size > config.max_size {
            return Err(PoolError::PoolExhausted(format!(
                "min_size {} exceeds max_size {}",
                config.min_size, config.max_size
            )));
        }
        let id = PoolId::new();
        let min = config.min_size;
        self.pools.write().insert(id, config);
        for _ in 0..min {
            if self.spawn_drone(id).is_err() {
                warn!(pool = %id, "global drone limit hit while pre-warming pool");
                break;
            }
        }
        info!(pool = %id, prewarmed = self.pool_size(id), "pool created");
        Ok(id)
    }

    /// Allocate a compatible drone, waiting up to `max_wait_ms`. `hints`
    /// carries the requester's expected resource footprint; drones whose
    /// declared capacity accommodates it are preferred, but the hint is
    /// advisory and never blocks an otherwise compatible allocation.
    ///
    /// A zero wait budget is strictly non-blocking: it either allocates
    /// immediately or fails without leaving anything in the queue.
    ///
    /// # Errors
    ///
    /// `AllocationTimeout` when the budget expires, `PoolExhausted` when no
    /// pool can ever serve the capability set.
    pub async fn request_drone(
        &self,
        required: &BTreeSet<String>,
        priority: u8,
        hints: Option<&ResourceFootprint>,
        max_wait_ms: u64,
    ) -> Result<Drone, PoolError> {
        if let Some(drone) = self.try_allocate(required, hints) {
            return Ok(drone);
        }

        if !self
            .pools
            .read()
            .values()
            .any(|p| covers(&p.capabilities, required))
        {
            return Err(PoolError::PoolExhausted(
                "no pool covers the requested capabilities".to_string(),
            ));
        }

        if max_wait_ms == 0 {
            return Err(PoolError::AllocationTimeout { waited_ms: 0 });
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().push(Waiter {
            ticket,
            required: required.clone(),
            priority,
            hints: hints.copied(),
            tx,
        });
        // A drone may have become idle between try_allocate and parking.
        self.drain_queue();

        match tokio::time::timeout(Duration::from_millis(max_wait_ms), rx).await {
            Ok(Ok(drone)) => Ok(drone),
            // Sender dropped: the serving side never completes a handoff
            // without sending, so treat it as a timeout.
            Ok(Err(_)) | Err(_) => {
                self.waiters.lock().retain(|w| w.ticket != ticket);
                Err(PoolError::AllocationTimeout {
                    waited_ms: max_wait_ms,
                })
            }
        }
    }

    /// Serve from an idle drone, or spawn into a pool with headroom.
    fn try_allocate(
        &self,
        required: &BTreeSet<String>,
        hints: Option<&ResourceFootprint>,
    ) -> Option<Drone> {
        {
            let mut drones = self.drones.write();
            let mut idle: Vec<&mut Drone> = drones
                .values_mut()
                .filter(|d| d.status == DroneStatus::Idle && d.is_compatible(required))
                .collect();
            // Footprint-fitting drones first, then deterministic by id under
            // concurrent callers.
            idle.sort_by_key(|d| (!fits_hint(d, hints), d.id));
            if let Some(drone) = idle.into_iter().next() {
                drone.status = DroneStatus::Assigned;
                drone.last_activity = Utc::now();
                let allocated = drone.clone();
                drop(drones);
                self.events.publish_drone_event(DroneEvent::DroneAssigned {
                    drone_id: allocated.id,
                    pool_id: allocated.pool,
                    assigned_at: Utc::now(),
                });
                return Some(allocated);
            }
        }

        let pool_id = {
            let pools = self.pools.read();
            pools
                .iter()
                .filter(|(_, p)| covers(&p.capabilities, required))
                .map(|(id, _)| *id)
                .min()
        }?;
        match self.spawn_drone(pool_id) {
            Ok(mut drone) => {
                let _ = self.update_drone(drone.id, &mut |d| {
                    d.status = DroneStatus::Assigned;
                    d.last_activity = Utc::now();
                });
                drone.status = DroneStatus::Assigned;
                self.events.publish_drone_event(DroneEvent::DroneAssigned {
                    drone_id: drone.id,
                    pool_id,
                    assigned_at: Utc::now(),
                });
                Some(drone)
            }
            Err(_) => None,
        }
    }

    /// Hand a drone back with its outcome report. The drone either returns
    /// to IDLE and serves the queue, or is recycled when its record breaches
    /// the success-rate floor, error ceiling, or age limit.
    pub fn return_drone(&self, id: DroneId, report: TaskReport) -> Result<(), PoolError> {
        let now = Utc::now();
        let mut recycle_reason: Option<String> = None;
        let mut pool_id = PoolId::new();

        self.update_drone(id, &mut |d| {
            d.performance.record(report.success, report.duration_ms);
            d.last_activity = now;
            pool_id = d.pool;

            if d.performance.success_rate() < self.config.recycle_success_floor {
                recycle_reason = Some(format!(
                    "success rate {:.2} below floor",
                    d.performance.success_rate()
                ));
            } else if d.performance.error_count > self.config.recycle_error_ceiling {
                recycle_reason = Some(format!("{} errors", d.performance.error_count));
            } else if d.age_ms(now) > self.config.recycle_max_age_ms {
                recycle_reason = Some(format!("aged {}ms", d.age_ms(now)));
            } else {
                d.status = DroneStatus::Idle;
            }
        })?;

        self.events.publish_drone_event(DroneEvent::DroneReturned {
            drone_id: id,
            pool_id,
            success: report.success,
            returned_at: now,
        });

        if let Some(reason) = recycle_reason {
            self.terminate_drone(id, &reason)?;
            self.replace_if_below_min(pool_id);
        }

        self.drain_queue();
        Ok(())
    }

    /// Record liveness for a busy drone (heartbeat from the execution side).
    pub fn record_drone_activity(&self, id: DroneId, now: DateTime<Utc>) -> Result<(), PoolError> {
        self.update_drone(id, &mut |d| {
            d.last_activity = now;
            if d.status == DroneStatus::Assigned {
                d.status = DroneStatus::Working;
            }
        })
    }

    /// Resize a pool toward `target`, clamped into `[min_size, max_size]`.
    /// Growth stops at the global limit; shrinking terminates IDLE drones
    /// only, so the result may stay above target while drones are busy.
    /// Returns the resulting size.
    pub fn scale_pool(&self, pool: PoolId, target: usize) -> Result<usize, PoolError> {
        let (min, max) = {
            let pools = self.pools.read();
            let config = pools.get(&pool).ok_or(PoolError::PoolNotFound(pool))?;
            (config.min_size, config.max_size)
        };
        let target = target.clamp(min, max);
        let current = self.pool_size(pool);

        if target > current {
            for _ in current..target {
                if self.spawn_drone(pool).is_err() {
                    break;
                }
            }
            self.drain_queue();
        } else if target < current {
            let idle: Vec<DroneId> = {
                let drones = self.drones.read();
                let mut ids: Vec<DroneId> = drones
                    .values()
                    .filter(|d| d.pool == pool && d.status == DroneStatus::Idle)
                    .map(|d| d.id)
                    .collect();
                ids.sort();
                ids.truncate(current - target);
                ids
            };
            for id in idle {
                self.terminate_drone(id, "scaled down")?;
            }
        }

        let size = self.pool_size(pool);
        debug!(pool = %pool, target, size, "pool scaled");
        Ok(size)
    }

    /// One autoscaling pass over all pools: grow a pool whose busy ratio
    /// exceeds the up-threshold, shrink one idling below the down-threshold.
    pub fn autoscale_tick(&self) {
        let pool_ids: Vec<PoolId> = self.pools.read().keys().copied().collect();
        for pool in pool_ids {
            let (current, active) = self.pool_counts(pool);
            if current == 0 {
                continue;
            }
            let ratio = active as f64 / current as f64;
            if ratio > self.config.scale_up_threshold {
                let _ = self.scale_pool(pool, current + 1);
            } else if ratio < self.config.scale_down_threshold {
                let _ = self.scale_pool(pool, current.saturating_sub(1));
            }
        }
    }

    /// Fail and recycle busy drones that have been unresponsive past the
    /// health timeout. Returns the number of drones recycled.
    pub fn health_tick(&self, now: DateTime<Utc>) -> usize {
        let stale: Vec<(DroneId, PoolId)> = {
            let drones = self.drones.read();
            drones
                .values()
                .filter(|d| d.status.is_busy())
                .filter(|d| {
                    (now - d.last_activity).num_milliseconds()
                        > self.config.health_timeout_ms as i64
                })
                .map(|d| (d.id, d.pool))
                .collect()
        };

        for (id, pool) in &stale {
            warn!(drone = %id, "drone unresponsive past health timeout");
            let _ = self.update_drone(*id, &mut |d| d.status = DroneStatus::Failed);
            let _ = self.terminate_drone(*id, "health timeout");
            self.replace_if_below_min(*pool);
        }
        if !stale.is_empty() {
            self.drain_queue();
        }
        stale.len()
    }

    /// Point-in-time snapshot of one pool.
    pub fn pool_status(&self, pool: PoolId) -> Result<PoolStatus, PoolError> {
        let (worker_type, capabilities) = {
            let pools = self.pools.read();
            let config = pools.get(&pool).ok_or(PoolError::PoolNotFound(pool))?;
            (config.worker_type.clone(), config.capabilities.clone())
        };

        let (current, active, idle, efficiency) = {
            let drones = self.drones.read();
            let members: Vec<&Drone> = drones.values().filter(|d| d.pool == pool).collect();
            let current = members.len();
            let active = members.iter().filter(|d| d.status.is_busy()).count();
            let idle = members
                .iter()
                .filter(|d| d.status == DroneStatus::Idle)
                .count();
            let efficiency = if members.is_empty() {
                1.0
            } else {
                members
                    .iter()
                    .map(|d| d.performance.success_rate())
                    .sum::<f64>()
                    / current as f64
            };
            (current, active, idle, efficiency)
        };
        let overlapping = self
            .waiters
            .lock()
            .iter()
            .filter(|w| covers(&capabilities, &w.required))
            .count();
        let demand = if current == 0 {
            overlapping as f64
        } else {
            overlapping as f64 / current as f64
        };

        Ok(PoolStatus {
            id: pool,
            worker_type,
            current,
            active,
            idle,
            demand,
            efficiency,
        })
    }

    pub fn pool_statuses(&self) -> Vec<PoolStatus> {
        let ids: Vec<PoolId> = self.pools.read().keys().copied().collect();
        ids.into_iter()
            .filter_map(|id| self.pool_status(id).ok())
            .collect()
    }

    pub fn total_drones(&self) -> usize {
        self.drones.read().len()
    }

    pub fn busy_drones(&self) -> usize {
        self.drones
            .read()
            .values()
            .filter(|d| d.status.is_busy())
            .count()
    }

    pub fn queued_requests(&self) -> usize {
        self.waiters.lock().len()
    }

    pub fn drone(&self, id: DroneId) -> Option<Drone> {
        self.drones.read().get(&id).cloned()
    }

    /// Match idle drones to parked requests: highest priority first, FIFO
    /// within a priority. A waiter whose receiver is gone (timed out) is
    /// dropped and its drone stays idle for the next pass.
    fn drain_queue(&self) {
        loop {
            let mut waiters = self.waiters.lock();
            if waiters.is_empty() {
                return;
            }

            // Highest priority, then oldest ticket.
            let mut order: Vec<usize> = (0..waiters.len()).collect();
            order.sort_by_key(|&i| (std::cmp::Reverse(waiters[i].priority), waiters[i].ticket));

            let mut handoff: Option<(usize, Drone)> = None;
            {
                let mut drones = self.drones.write();
                'outer: for &wi in &order {
                    let hints = waiters[wi].hints;
                    let mut idle: Vec<&mut Drone> = drones
                        .values_mut()
                        .filter(|d| d.status == DroneStatus::Idle)
                        .collect();
                    idle.sort_by_key(|d| (!fits_hint(d, hints.as_ref()), d.id));
                    for drone in idle {
                        if drone.is_compatible(&waiters[wi].required) {
                            drone.status = DroneStatus::Assigned;
                            drone.last_activity = Utc::now();
                            handoff = Some((wi, drone.clone()));
                            break 'outer;
                        }
                    }
                }
            }

            match handoff {
                Some((wi, drone)) => {
                    let waiter = waiters.swap_remove(wi);
                    let drone_id = drone.id;
                    let pool_id = drone.pool;
                    if waiter.tx.send(drone).is_err() {
                        // Receiver timed out; release the drone and retry.
                        if let Some(d) = self.drones.write().get_mut(&drone_id) {
                            d.status = DroneStatus::Idle;
                        }
                        continue;
                    }
                    drop(waiters);
                    self.events.publish_drone_event(DroneEvent::DroneAssigned {
                        drone_id,
                        pool_id,
                        assigned_at: Utc::now(),
                    });
                }
                None => return,
            }
        }
    }

    fn spawn_drone(&self, pool: PoolId) -> Result<Drone, PoolError> {
        let config = {
            let pools = self.pools.read();
            pools
                .get(&pool)
                .ok_or(PoolError::PoolNotFound(pool))?
                .clone()
        };

        {
            let mut drones = self.drones.write();
            if drones.len() >= self.config.global_max_drones {
                return Err(PoolError::GlobalLimitReached {
                    limit: self.config.global_max_drones,
                });
            }
            if drones.values().filter(|d| d.pool == pool).count() >= config.max_size {
                return Err(PoolError::PoolExhausted(format!(
                    "pool {pool} is at max_size {}",
                    config.max_size
                )));
            }
            let drone = Drone::new(pool, config.worker_type.clone(), config.capabilities.clone());
            let snapshot = drone.clone();
            drones.insert(drone.id, drone);
            drop(drones);

            debug!(drone = %snapshot.id, pool = %pool, "drone spawned");
            self.events.publish_drone_event(DroneEvent::DroneSpawned {
                drone_id: snapshot.id,
                pool_id: pool,
                worker_type: snapshot.worker_type.clone(),
                spawned_at: snapshot.spawned_at,
            });
            metrics::gauge!("aegis_swarm_drones").set(self.total_drones() as f64);
            Ok(snapshot)
        }
    }

    fn terminate_drone(&self, id: DroneId, reason: &str) -> Result<(), PoolError> {
        let drone = self
            .drones
            .write()
            .remove(&id)
            .ok_or(PoolError::DroneNotFound(id))?;
        info!(drone = %id, pool = %drone.pool, reason, "drone terminated");
        self.events.publish_drone_event(DroneEvent::DroneTerminated {
            drone_id: id,
            pool_id: drone.pool,
            reason: reason.to_string(),
            terminated_at: Utc::now(),
        });
        metrics::gauge!("aegis_swarm_drones").set(self.total_drones() as f64);
        Ok(())
    }

    /// Replacement after recycling keeps a pool at its floor, never above it.
    fn replace_if_below_min(&self, pool: PoolId) {
        let min = {
            let pools = self.pools.read();
            pools.get(&pool).map(|p| p.min_size).unwrap_or(0)
        };
        if self.pool_size(pool) < min {
            if let Err(e) = self.spawn_drone(pool) {
                warn!(pool = %pool, error = %e, "could not replace recycled drone");
            }
        }
    }

    fn pool_size(&self, pool: PoolId) -> usize {
        self.drones
            .read()
            .values()
            .filter(|d| d.pool == pool)
            .count()
    }

    fn pool_counts(&self, pool: PoolId) -> (usize, usize) {
        let drones = self.drones.read();
        let members: Vec<&Drone> = drones.values().filter(|d| d.pool == pool).collect();
        let active = members.iter().filter(|d| d.status.is_busy()).count();
        (members.len(), active)
    }

    fn update_drone(
        &self,
        id: DroneId,
        f: &mut dyn FnMut(&mut Drone),
    ) -> Result<(), PoolError> {
        let mut drones = self.drones.write();
        let drone = drones.get_mut(&id).ok_or(PoolError::DroneNotFound(id))?;
        f(drone);
        Ok(())
    }
}

/// Whether a drone's declared capacity accommodates the requester's hint.
/// No hint means every drone fits.
fn fits_hint(drone: &Drone, hints: Option<&ResourceFootprint>) -> bool {
    hints.map_or(true, |h| drone.footprint.accommodates(h))
}

/// Substring subset coverage, matching drone capability semantics.
fn covers(capabilities: &BTreeSet<String>, required: &BTreeSet<String>) -> bool {
    required.iter().all(|req| {
        capabilities
            .iter()
            .any(|cap| cap.contains(req.as_str()) || req.contains(cap.as_str()))
    })
}
