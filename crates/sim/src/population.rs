//! Host-side population bookkeeping shared by the CPU and GPU simulations.

use std::collections::BTreeMap;

use crate::obstacle::{ObstacleKind, ObstacleLayout};
use crate::particle::{Attribution, RemovalCause, SpeciesId};

/// Cumulative removal counters, per species and per obstacle id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemovalTally {
    drained: Vec<u64>,
    absorbed: Vec<u64>,
    by_obstacle: BTreeMap<u32, u64>,
}

impl RemovalTally {
    pub fn new(num_species: usize) -> Self {
        Self {
            drained: vec![0; num_species],
            absorbed: vec![0; num_species],
            by_obstacle: BTreeMap::new(),
        }
    }

    /// Particles of `species` swallowed by drains.
    pub fn drained(&self, species: SpeciesId) -> u64 {
        self.drained.get(species as usize).copied().unwrap_or(0)
    }

    /// Particles of `species` absorbed by agents.
    pub fn absorbed(&self, species: SpeciesId) -> u64 {
        self.absorbed.get(species as usize).copied().unwrap_or(0)
    }

    pub fn by_obstacle(&self, id: u32) -> u64 {
        self.by_obstacle.get(&id).copied().unwrap_or(0)
    }

    pub fn obstacles(&self) -> impl Iterator<Item = (u32, u64)> + '_ {
        self.by_obstacle.iter().map(|(&id, &n)| (id, n))
    }

    pub fn total(&self) -> u64 {
        self.drained.iter().sum::<u64>() + self.absorbed.iter().sum::<u64>()
    }

    pub fn record(&mut self, species: SpeciesId, cause: RemovalCause, obstacle: Option<u32>) {
        let counters = match cause {
            RemovalCause::None => return,
            RemovalCause::Drain => &mut self.drained,
            RemovalCause::Agent => &mut self.absorbed,
        };
        let s = species as usize;
        if counters.len() <= s {
            counters.resize(s + 1, 0);
        }
        counters[s] += 1;
        if let Some(id) = obstacle {
            *self.by_obstacle.entry(id).or_insert(0) += 1;
        }
    }

    pub fn reset(&mut self) {
        self.drained.iter_mut().for_each(|n| *n = 0);
        self.absorbed.iter_mut().for_each(|n| *n = 0);
        self.by_obstacle.clear();
    }
}

/// Obstacle responsible for a removal: the first recorded obstacle whose
/// kind matches the cause (and, for agents, whose mask covers the species).
pub fn responsible_obstacle(
    cause: RemovalCause,
    species: SpeciesId,
    attribution: &Attribution,
    layout: &ObstacleLayout,
) -> Option<u32> {
    let wanted = match cause {
        RemovalCause::None => return None,
        RemovalCause::Drain => ObstacleKind::Drain,
        RemovalCause::Agent => ObstacleKind::Agent,
    };
    attribution.iter().find_map(|&index| {
        let record = layout.records.get(usize::try_from(index).ok()?)?;
        let absorbs = cause != RemovalCause::Agent
            || (species < 32 && record.absorbs & (1 << species) != 0);
        (record.kind == wanted && absorbs)
            .then(|| layout.id_of(index))
            .flatten()
    })
}

/// Walk the removal flags in ascending index order and tally every flagged
/// particle. Returns the number flagged.
pub fn scan_removals(
    removal: &[u32],
    species: &[SpeciesId],
    attribution: &[Attribution],
    layout: &ObstacleLayout,
    tally: &mut RemovalTally,
) -> usize {
    let mut flagged = 0;
    for (i, &raw) in removal.iter().enumerate() {
        let cause = RemovalCause::from_raw(raw);
        if !cause.is_removed() {
            continue;
        }
        flagged += 1;
        let s = species.get(i).copied().unwrap_or(0);
        let obstacle = attribution
            .get(i)
            .and_then(|record| responsible_obstacle(cause, s, record, layout));
        tally.record(s, cause, obstacle);
    }
    flagged
}

/// How many of `requested` new particles fit under `ceiling`.
pub fn clamp_spawn(current: usize, requested: usize, ceiling: usize) -> usize {
    let allowed = requested.min(ceiling.saturating_sub(current));
    if allowed < requested {
        log::debug!(
            "Spawn clamped: {} requested, {} allowed ({} of {} particles live)",
            requested,
            allowed,
            current,
            ceiling
        );
    }
    allowed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obstacle::Obstacle;
    use crate::particle::{EMPTY_ATTRIBUTION, NO_OBSTACLE};
    use glam::Vec2;

    fn layout() -> ObstacleLayout {
        ObstacleLayout::build(
            &[
                Obstacle::disc(100, ObstacleKind::Static, Vec2::ZERO, 1.0),
                Obstacle::disc(200, ObstacleKind::Agent, Vec2::X, 1.0).absorbing(0b10),
                Obstacle::disc(300, ObstacleKind::Drain, Vec2::Y, 1.0),
            ],
            &[],
        )
    }

    #[test]
    fn clamp_respects_ceiling() {
        assert_eq!(clamp_spawn(10, 5, 100), 5);
        assert_eq!(clamp_spawn(98, 5, 100), 2);
        assert_eq!(clamp_spawn(100, 5, 100), 0);
        assert_eq!(clamp_spawn(120, 5, 100), 0);
    }

    #[test]
    fn scan_tallies_each_flag_once() {
        let layout = layout();
        let removal = [0, 1, 2, 0, 1];
        let species = [0, 0, 1, 1, 2];
        let attribution = [
            [0, NO_OBSTACLE, NO_OBSTACLE, NO_OBSTACLE],
            [0, 2, NO_OBSTACLE, NO_OBSTACLE],
            [1, NO_OBSTACLE, NO_OBSTACLE, NO_OBSTACLE],
            EMPTY_ATTRIBUTION,
            EMPTY_ATTRIBUTION,
        ];
        let mut tally = RemovalTally::new(3);
        let flagged = scan_removals(&removal, &species, &attribution, &layout, &mut tally);
        assert_eq!(flagged, 3);
        assert_eq!(tally.drained(0), 1);
        assert_eq!(tally.drained(2), 1);
        assert_eq!(tally.absorbed(1), 1);
        assert_eq!(tally.total(), 3);
        assert_eq!(tally.by_obstacle(300), 1);
        assert_eq!(tally.by_obstacle(200), 1);
        assert_eq!(tally.by_obstacle(100), 0);
    }

    #[test]
    fn agent_must_absorb_species_to_be_responsible() {
        let layout = layout();
        let record = [1, NO_OBSTACLE, NO_OBSTACLE, NO_OBSTACLE];
        assert_eq!(responsible_obstacle(RemovalCause::Agent, 1, &record, &layout), Some(200));
        assert_eq!(responsible_obstacle(RemovalCause::Agent, 0, &record, &layout), None);
        assert_eq!(responsible_obstacle(RemovalCause::Drain, 1, &record, &layout), None);
    }

    #[test]
    fn tally_grows_for_unknown_species() {
        let mut tally = RemovalTally::new(1);
        tally.record(5, RemovalCause::Drain, None);
        assert_eq!(tally.drained(5), 1);
        assert_eq!(tally.absorbed(5), 0);
        tally.reset();
        assert_eq!(tally.total(), 0);
    }
}
