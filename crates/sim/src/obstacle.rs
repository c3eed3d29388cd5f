//! Obstacles, force zones and their flattened device layout.
//!
//! Obstacles are registered by the embedding application every frame with an
//! explicit [`ObstacleKind`]. [`ObstacleLayout::build`] flattens them into
//! fixed-size records plus one shared vertex list, which is the form both the
//! CPU solver and the GPU collision pass consume.

use glam::Vec2;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObstacleKind {
    /// Tracked entity that absorbs particles of the species in its mask.
    Agent,
    /// Plain barrier.
    Static,
    /// Outlet: every particle that enters is removed.
    Drain,
}

impl ObstacleKind {
    pub const fn tag(self) -> u32 {
        match self {
            ObstacleKind::Agent => 0,
            ObstacleKind::Static => 1,
            ObstacleKind::Drain => 2,
        }
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(ObstacleKind::Agent),
            1 => Some(ObstacleKind::Static),
            2 => Some(ObstacleKind::Drain),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    /// Caller-chosen id, reported back in removal tallies.
    pub id: u32,
    pub kind: ObstacleKind,
    /// 1 point: disc, 2 points: capsule, 3 or more: closed polygon.
    pub points: Vec<Vec2>,
    pub color: [u8; 4],
    /// Diameter of discs and thickness of capsules.
    pub width: f32,
    /// Bit `s` set means an agent absorbs species `s`.
    pub absorbs: u32,
}

impl Obstacle {
    pub fn polygon(id: u32, kind: ObstacleKind, points: Vec<Vec2>) -> Self {
        Self {
            id,
            kind,
            points,
            color: [255; 4],
            width: 0.0,
            absorbs: 0,
        }
    }

    pub fn disc(id: u32, kind: ObstacleKind, centre: Vec2, radius: f32) -> Self {
        Self {
            width: radius * 2.0,
            ..Self::polygon(id, kind, vec![centre])
        }
    }

    pub fn capsule(id: u32, kind: ObstacleKind, a: Vec2, b: Vec2, thickness: f32) -> Self {
        Self {
            width: thickness,
            ..Self::polygon(id, kind, vec![a, b])
        }
    }

    /// Axis-aligned box as a four-point polygon.
    pub fn rect(id: u32, kind: ObstacleKind, centre: Vec2, size: Vec2) -> Self {
        let h = size * 0.5;
        Self::polygon(
            id,
            kind,
            vec![
                centre + Vec2::new(-h.x, -h.y),
                centre + Vec2::new(h.x, -h.y),
                centre + Vec2::new(h.x, h.y),
                centre + Vec2::new(-h.x, h.y),
            ],
        )
    }

    pub fn absorbing(mut self, species_mask: u32) -> Self {
        self.absorbs = species_mask;
        self
    }

    pub fn centroid(&self) -> Vec2 {
        if self.points.is_empty() {
            return Vec2::ZERO;
        }
        self.points.iter().copied().sum::<Vec2>() / self.points.len() as f32
    }
}

/// Region that adds an acceleration to the particles inside it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ForceZone {
    /// Pushes along `end - start`, fading linearly with distance from the
    /// segment.
    Current {
        start: Vec2,
        end: Vec2,
        radius: f32,
        strength: f32,
    },
    /// Radial pull towards `centre`. Negative strength repels.
    GravityWell {
        centre: Vec2,
        radius: f32,
        strength: f32,
    },
}

pub const FORCE_ZONE_CURRENT: u32 = 0;
pub const FORCE_ZONE_GRAVITY_WELL: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ObstacleRecord {
    pub centroid: Vec2,
    pub width: f32,
    pub kind: ObstacleKind,
    pub vertex_start: u32,
    pub vertex_count: u32,
    pub absorbs: u32,
    /// RGBA packed little-endian.
    pub color: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ForceZoneRecord {
    pub kind: u32,
    pub a: Vec2,
    pub b: Vec2,
    pub radius: f32,
    pub strength: f32,
}

impl From<&ForceZone> for ForceZoneRecord {
    fn from(zone: &ForceZone) -> Self {
        match *zone {
            ForceZone::Current {
                start,
                end,
                radius,
                strength,
            } => Self {
                kind: FORCE_ZONE_CURRENT,
                a: start,
                b: end,
                radius,
                strength,
            },
            ForceZone::GravityWell {
                centre,
                radius,
                strength,
            } => Self {
                kind: FORCE_ZONE_GRAVITY_WELL,
                a: centre,
                b: centre,
                radius,
                strength,
            },
        }
    }
}

impl ForceZoneRecord {
    /// Acceleration this zone applies at `pos`.
    pub fn acceleration(&self, pos: Vec2) -> Vec2 {
        if self.radius <= 0.0 {
            return Vec2::ZERO;
        }
        match self.kind {
            FORCE_ZONE_CURRENT => {
                let closest = closest_point_on_segment(pos, self.a, self.b);
                let dst = pos.distance(closest);
                let axis = self.b - self.a;
                let len = axis.length();
                if dst >= self.radius || len <= 1e-6 {
                    return Vec2::ZERO;
                }
                let falloff = 1.0 - dst / self.radius;
                axis / len * self.strength * falloff
            }
            _ => {
                let offset = self.a - pos;
                let dst = offset.length();
                if dst >= self.radius || dst <= 1e-6 {
                    return Vec2::ZERO;
                }
                let falloff = 1.0 - dst / self.radius;
                offset / dst * self.strength * falloff
            }
        }
    }
}

/// Obstacles and force zones flattened for one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObstacleLayout {
    pub records: Vec<ObstacleRecord>,
    pub vertices: Vec<Vec2>,
    pub zones: Vec<ForceZoneRecord>,
    /// External id of `records[i]`.
    pub ids: Vec<u32>,
}

impl ObstacleLayout {
    pub fn build(obstacles: &[Obstacle], zones: &[ForceZone]) -> Self {
        let mut layout = Self {
            records: Vec::with_capacity(obstacles.len()),
            vertices: Vec::with_capacity(obstacles.iter().map(|o| o.points.len()).sum()),
            zones: zones.iter().map(ForceZoneRecord::from).collect(),
            ids: Vec::with_capacity(obstacles.len()),
        };
        for obstacle in obstacles {
            let vertex_start = layout.vertices.len() as u32;
            layout.vertices.extend_from_slice(&obstacle.points);
            layout.records.push(ObstacleRecord {
                centroid: obstacle.centroid(),
                width: obstacle.width.max(0.0),
                kind: obstacle.kind,
                vertex_start,
                vertex_count: obstacle.points.len() as u32,
                absorbs: obstacle.absorbs,
                color: u32::from_le_bytes(obstacle.color),
            });
            layout.ids.push(obstacle.id);
        }
        layout
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.zones.is_empty()
    }

    pub fn vertices_of(&self, record: &ObstacleRecord) -> &[Vec2] {
        let start = record.vertex_start as usize;
        let end = start + record.vertex_count as usize;
        &self.vertices[start..end]
    }

    /// External id for a recorded obstacle index, `None` for `-1` or stale
    /// indices.
    pub fn id_of(&self, index: i32) -> Option<u32> {
        usize::try_from(index).ok().and_then(|i| self.ids.get(i).copied())
    }
}

/// Where a penetrating particle is pushed to and the outward surface normal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Contact {
    pub position: Vec2,
    pub normal: Vec2,
}

#[inline]
fn cross(a: Vec2, b: Vec2) -> f32 {
    a.x * b.y - a.y * b.x
}

pub fn closest_point_on_segment(p: Vec2, a: Vec2, b: Vec2) -> Vec2 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq <= 1e-12 {
        return a;
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    a + ab * t
}

/// Crossing-number test; the polygon is implicitly closed.
pub fn point_in_polygon(p: Vec2, vertices: &[Vec2]) -> bool {
    let n = vertices.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (a, b) = (vertices[i], vertices[j]);
        if (a.y > p.y) != (b.y > p.y) && p.x < (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Parameter `t` along `p0 -> p1` where it crosses segment `a -> b`.
pub fn segment_intersection(p0: Vec2, p1: Vec2, a: Vec2, b: Vec2) -> Option<f32> {
    let r = p1 - p0;
    let s = b - a;
    let denom = cross(r, s);
    if denom.abs() <= 1e-12 {
        return None;
    }
    let qp = a - p0;
    let t = cross(qp, s) / denom;
    let u = cross(qp, r) / denom;
    ((0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u)).then_some(t)
}

fn edge_normal_away_from(a: Vec2, b: Vec2, centroid: Vec2) -> Vec2 {
    let edge = b - a;
    let n = Vec2::new(edge.y, -edge.x).normalize_or_zero();
    if n.dot((a + b) * 0.5 - centroid) < 0.0 {
        -n
    } else {
        n
    }
}

fn polygon_contact(
    record: &ObstacleRecord,
    vertices: &[Vec2],
    prev: Vec2,
    pos: Vec2,
    skin: f32,
) -> Option<Contact> {
    let n = vertices.len();
    if point_in_polygon(pos, vertices) {
        let mut best = (f32::INFINITY, pos, Vec2::ZERO);
        for i in 0..n {
            let (a, b) = (vertices[i], vertices[(i + 1) % n]);
            let q = closest_point_on_segment(pos, a, b);
            let d = pos.distance_squared(q);
            if d < best.0 {
                best = (d, q, edge_normal_away_from(a, b, record.centroid));
            }
        }
        let (_, q, edge_normal) = best;
        let to_surface = q - pos;
        let normal = if to_surface.length_squared() > 1e-12 {
            to_surface.normalize()
        } else {
            edge_normal
        };
        return Some(Contact {
            position: q + normal * skin,
            normal,
        });
    }

    // Fast particles can pass straight through thin polygons in one step.
    let mut first: Option<(f32, Vec2, Vec2)> = None;
    for i in 0..n {
        let (a, b) = (vertices[i], vertices[(i + 1) % n]);
        if let Some(t) = segment_intersection(prev, pos, a, b) {
            if first.map_or(true, |(best, _, _)| t < best) {
                first = Some((t, a, b));
            }
        }
    }
    first.map(|(t, a, b)| {
        let hit = prev + (pos - prev) * t;
        let edge = b - a;
        let mut normal = Vec2::new(edge.y, -edge.x).normalize_or_zero();
        if normal.dot(prev - hit) < 0.0 {
            normal = -normal;
        }
        Contact {
            position: hit + normal * skin,
            normal,
        }
    })
}

fn round_contact(centre: Vec2, radius: f32, prev: Vec2, pos: Vec2, skin: f32) -> Option<Contact> {
    let offset = pos - centre;
    let dst = offset.length();
    if dst >= radius {
        return None;
    }
    let normal = if dst > 1e-6 {
        offset / dst
    } else {
        (prev - centre).try_normalize().unwrap_or(Vec2::Y)
    };
    Some(Contact {
        position: centre + normal * (radius + skin),
        normal,
    })
}

/// Penetration test of a particle that moved from `prev` to `pos` against one
/// obstacle. `skin` is the particle radius kept between surface and particle.
pub fn obstacle_contact(
    record: &ObstacleRecord,
    vertices: &[Vec2],
    prev: Vec2,
    pos: Vec2,
    skin: f32,
) -> Option<Contact> {
    match vertices.len() {
        0 => None,
        1 => round_contact(vertices[0], record.width * 0.5, prev, pos, skin),
        2 => {
            let centre = closest_point_on_segment(pos, vertices[0], vertices[1]);
            round_contact(centre, record.width * 0.5, prev, pos, skin)
        }
        _ => polygon_contact(record, vertices, prev, pos, skin),
    }
}

/// Reflect the normal velocity component, scaled by `damping`, when the
/// particle moves into the surface.
#[inline]
pub fn reflect_velocity(velocity: Vec2, normal: Vec2, damping: f32) -> Vec2 {
    let vn = velocity.dot(normal);
    if vn < 0.0 {
        velocity - normal * vn * (1.0 + damping)
    } else {
        velocity
    }
}
