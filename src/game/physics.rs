//! Planar physics: the collaborator interface and the built-in arena engine

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::UnitId;
use crate::util::time::tick_delta;

/// 3D vector, Y is up. Units move on the XZ plane.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Same vector with the vertical component dropped
    pub fn planar(self) -> Self {
        Self::new(self.x, 0.0, self.z)
    }

    pub fn length_squared(self) -> f32 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Unit-length copy, `None` for (near) zero vectors
    pub fn normalized(self) -> Option<Self> {
        let len_sq = self.length_squared();
        if len_sq < 1e-4 || !len_sq.is_finite() {
            return None;
        }
        Some(self.scale(1.0 / len_sq.sqrt()))
    }

    pub fn scale(self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }

    pub fn add(self, o: Vec3) -> Self {
        Self::new(self.x + o.x, self.y + o.y, self.z + o.z)
    }

    pub fn sub(self, o: Vec3) -> Self {
        Self::new(self.x - o.x, self.y - o.y, self.z - o.z)
    }

    pub fn dot(self, o: Vec3) -> f32 {
        self.x * o.x + self.y * o.y + self.z * o.z
    }
}

/// Position plus heading (yaw in degrees around Y)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub yaw: f32,
}

impl Pose {
    pub fn new(position: Vec3, yaw: f32) -> Self {
        Self { position, yaw }
    }
}

/// Two bodies started touching this step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    pub a: UnitId,
    pub b: UnitId,
    pub point: Vec3,
    /// Points from `a` towards `b`
    pub normal: Vec3,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PhysicsError {
    #[error("no physics body registered for unit {0}")]
    MissingBody(UnitId),
}

/// What the simulation needs from a rigid-body engine.
pub trait PhysicsBackend: Send {
    /// Velocity on the horizontal plane
    fn planar_velocity(&self, id: UnitId) -> Result<Vec3, PhysicsError>;
    /// Instantaneous velocity change (unit mass)
    fn apply_impulse(&mut self, id: UnitId, impulse: Vec3) -> Result<(), PhysicsError>;
    fn drag(&self, id: UnitId) -> Result<f32, PhysicsError>;
    fn set_drag(&mut self, id: UnitId, drag: f32) -> Result<(), PhysicsError>;
    fn zero_velocity(&mut self, id: UnitId) -> Result<(), PhysicsError>;
    fn pose(&self, id: UnitId) -> Result<Pose, PhysicsError>;
    fn set_pose(&mut self, id: UnitId, pose: Pose) -> Result<(), PhysicsError>;
    /// Heading the body eases towards on the next steps
    fn set_target_yaw(&mut self, id: UnitId, yaw: f32) -> Result<(), PhysicsError>;
    /// Inactive bodies neither move nor collide
    fn set_active(&mut self, id: UnitId, active: bool) -> Result<(), PhysicsError>;
    /// Advance one tick, returning contacts that began during it
    fn step(&mut self) -> Vec<Contact>;
}

/// Arena constants for the built-in engine
#[derive(Debug, Clone, Copy)]
pub struct ArenaStats {
    /// Half the side length of the square arena
    pub half_extent: f32,
    /// Constant planar deceleration from the surface
    pub friction: f32,
    /// Velocity kept after bouncing off a wall
    pub wall_restitution: f32,
    /// Velocity kept along the normal in unit-unit contacts
    pub contact_restitution: f32,
    /// Drag restored when a unit is at rest
    pub default_drag: f32,
    /// Yaw easing factor per second
    pub yaw_lerp_speed: f32,
}

impl Default for ArenaStats {
    fn default() -> Self {
        Self {
            half_extent: 12.0,
            friction: 6.0,
            wall_restitution: 0.5,
            contact_restitution: 0.8,
            default_drag: 0.0,
            yaw_lerp_speed: 8.0,
        }
    }
}

#[derive(Debug, Clone)]
struct Body {
    position: Vec3,
    velocity: Vec3,
    yaw: f32,
    target_yaw: Option<f32>,
    drag: f32,
    radius: f32,
    active: bool,
}

/// Deterministic disc physics on a walled square arena
pub struct ArenaPhysics {
    stats: ArenaStats,
    // BTreeMap keeps iteration order stable across runs
    bodies: BTreeMap<UnitId, Body>,
    touching: BTreeSet<(UnitId, UnitId)>,
}

impl ArenaPhysics {
    pub fn new(stats: ArenaStats) -> Self {
        Self {
            stats,
            bodies: BTreeMap::new(),
            touching: BTreeSet::new(),
        }
    }

    /// Register a body at rest
    pub fn spawn(&mut self, id: UnitId, pose: Pose, radius: f32) {
        self.bodies.insert(
            id,
            Body {
                position: pose.position.planar(),
                velocity: Vec3::ZERO,
                yaw: pose.yaw,
                target_yaw: None,
                drag: self.stats.default_drag,
                radius,
                active: true,
            },
        );
    }

    fn body(&self, id: UnitId) -> Result<&Body, PhysicsError> {
        self.bodies.get(&id).ok_or(PhysicsError::MissingBody(id))
    }

    fn body_mut(&mut self, id: UnitId) -> Result<&mut Body, PhysicsError> {
        self.bodies.get_mut(&id).ok_or(PhysicsError::MissingBody(id))
    }

    /// Update one body's heading, velocity and position
    fn integrate(body: &mut Body, stats: &ArenaStats, dt: f32) {
        if let Some(target) = body.target_yaw {
            let t = (stats.yaw_lerp_speed * dt).clamp(0.0, 1.0);
            body.yaw = lerp_angle(body.yaw, target, t);
        }

        let mut vel = body.velocity.planar();
        let speed = vel.length();
        if speed > 0.0 {
            // Surface friction, then drag
            let slowed = (speed - stats.friction * dt).max(0.0);
            vel = vel.scale(slowed / speed);
            vel = vel.scale(1.0 / (1.0 + body.drag * dt));
        }

        let mut pos = body.position.add(vel.scale(dt));

        // Bounce off the arena walls
        let limit = stats.half_extent - body.radius;
        if pos.x.abs() > limit {
            pos.x = pos.x.clamp(-limit, limit);
            vel.x = -vel.x * stats.wall_restitution;
        }
        if pos.z.abs() > limit {
            pos.z = pos.z.clamp(-limit, limit);
            vel.z = -vel.z * stats.wall_restitution;
        }

        body.position = pos;
        body.velocity = vel;
    }

    /// Check overlap between two discs
    pub fn check_collision(p1: Vec3, r1: f32, p2: Vec3, r2: f32) -> bool {
        let d = p2.sub(p1).planar();
        let combined = r1 + r2;
        d.length_squared() <= combined * combined
    }
}

impl Default for ArenaPhysics {
    fn default() -> Self {
        Self::new(ArenaStats::default())
    }
}

impl PhysicsBackend for ArenaPhysics {
    fn planar_velocity(&self, id: UnitId) -> Result<Vec3, PhysicsError> {
        Ok(self.body(id)?.velocity.planar())
    }

    fn apply_impulse(&mut self, id: UnitId, impulse: Vec3) -> Result<(), PhysicsError> {
        let body = self.body_mut(id)?;
        body.velocity = body.velocity.add(impulse).planar();
        Ok(())
    }

    fn drag(&self, id: UnitId) -> Result<f32, PhysicsError> {
        Ok(self.body(id)?.drag)
    }

    fn set_drag(&mut self, id: UnitId, drag: f32) -> Result<(), PhysicsError> {
        self.body_mut(id)?.drag = drag.max(0.0);
        Ok(())
    }

    fn zero_velocity(&mut self, id: UnitId) -> Result<(), PhysicsError> {
        self.body_mut(id)?.velocity = Vec3::ZERO;
        Ok(())
    }

    fn pose(&self, id: UnitId) -> Result<Pose, PhysicsError> {
        let body = self.body(id)?;
        Ok(Pose::new(body.position, body.yaw))
    }

    fn set_pose(&mut self, id: UnitId, pose: Pose) -> Result<(), PhysicsError> {
        let body = self.body_mut(id)?;
        body.position = pose.position.planar();
        body.yaw = pose.yaw;
        body.target_yaw = None;
        Ok(())
    }

    fn set_target_yaw(&mut self, id: UnitId, yaw: f32) -> Result<(), PhysicsError> {
        self.body_mut(id)?.target_yaw = Some(yaw);
        Ok(())
    }

    fn set_active(&mut self, id: UnitId, active: bool) -> Result<(), PhysicsError> {
        let body = self.body_mut(id)?;
        body.active = active;
        if !active {
            body.velocity = Vec3::ZERO;
            self.touching.retain(|(a, b)| *a != id && *b != id);
        }
        Ok(())
    }

    fn step(&mut self) -> Vec<Contact> {
        let dt = tick_delta();
        let stats = self.stats;

        for body in self.bodies.values_mut().filter(|b| b.active) {
            Self::integrate(body, &stats, dt);
        }

        let ids: Vec<UnitId> = self
            .bodies
            .iter()
            .filter(|(_, b)| b.active)
            .map(|(id, _)| *id)
            .collect();

        let mut contacts = Vec::new();
        let mut touching_now = BTreeSet::new();

        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let (id1, id2) = (ids[i], ids[j]);
                let (b1, b2) = match (self.bodies.get(&id1), self.bodies.get(&id2)) {
                    (Some(b1), Some(b2)) => (b1.clone(), b2.clone()),
                    _ => continue,
                };

                if !Self::check_collision(b1.position, b1.radius, b2.position, b2.radius) {
                    continue;
                }

                let delta = b2.position.sub(b1.position).planar();
                let dist = delta.length();
                let normal = if dist < 0.001 {
                    // Same spot, push apart arbitrarily
                    Vec3::new(1.0, 0.0, 0.0)
                } else {
                    delta.scale(1.0 / dist)
                };

                touching_now.insert((id1, id2));
                if !self.touching.contains(&(id1, id2)) {
                    contacts.push(Contact {
                        a: id1,
                        b: id2,
                        point: b1.position.add(normal.scale(b1.radius)),
                        normal,
                    });
                }

                // Push apart by half the overlap each
                let overlap = (b1.radius + b2.radius) - dist;
                let push = normal.scale(overlap / 2.0 + 0.001);
                let mut new_v1 = b1.velocity;
                let mut new_v2 = b2.velocity;

                // Exchange the approaching part of the velocity along the normal
                let approach = b1.velocity.sub(b2.velocity).dot(normal);
                if approach > 0.0 {
                    let j = approach * (1.0 + stats.contact_restitution) / 2.0;
                    new_v1 = new_v1.sub(normal.scale(j));
                    new_v2 = new_v2.add(normal.scale(j));
                }

                if let Some(b) = self.bodies.get_mut(&id1) {
                    b.position = b.position.sub(push);
                    b.velocity = new_v1;
                }
                if let Some(b) = self.bodies.get_mut(&id2) {
                    b.position = b.position.add(push);
                    b.velocity = new_v2;
                }
            }
        }

        self.touching = touching_now;
        contacts
    }
}

/// Interpolate between two headings in degrees along the short way round
fn lerp_angle(from: f32, to: f32, t: f32) -> f32 {
    let delta = (to - from + 180.0).rem_euclid(360.0) - 180.0;
    (from + delta * t).rem_euclid(360.0)
}
