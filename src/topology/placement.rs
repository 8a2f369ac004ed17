//! Grouping of a structure string into 8-pin IC sockets for the placement guide.
//! Placements are never transmitted to the firmware.
use serde::{Deserialize, Serialize};

use super::structure::parse_runs;
use super::{Mode, PlacedComponent};

/// Components one 8-pin socket can hold (2 pins per component)
pub const COMPONENTS_PER_IC: usize = 4;

/// One IC socket and the components placed into it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IcPlacement {
    pub ic_number: usize,
    pub mode: Mode,
    pub components: Vec<PlacedComponent>,
    pub is_parallel: bool,
}

/// How the trailing socket of a parallel run is flagged when it ends up
/// holding a single component
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum RemainderPolicy {
    /// The remainder belongs to a parallel run and stays parallel
    #[default]
    KeepParallel,
    /// A one-component remainder is shown as a series socket
    SingleAsSeries,
}

/// Plan socket placements using the default remainder policy
pub fn plan_placements(structure: &str, components: &[PlacedComponent]) -> Vec<IcPlacement> {
    plan_placements_with(structure, components, RemainderPolicy::default())
}

/// Plan socket placements for `structure`, drawing components in order.
///
/// A run of one is always series. When `components` runs out early the last
/// socket is left partially filled and empty sockets are not emitted.
pub fn plan_placements_with(
    structure: &str,
    components: &[PlacedComponent],
    policy: RemainderPolicy,
) -> Vec<IcPlacement> {
    let mut placements = Vec::new();
    let mut remaining = components.iter();
    let mut ic_number = 1;

    for run in parse_runs(structure) {
        if remaining.as_slice().is_empty() {
            break;
        }
        let mode = if run.count == 1 { Mode::Series } else { run.mode };

        match mode {
            Mode::Series => {
                for component in remaining.by_ref().take(run.count) {
                    placements.push(IcPlacement {
                        ic_number,
                        mode,
                        components: vec![placed_as(component, mode)],
                        is_parallel: false,
                    });
                    ic_number += 1;
                }
            }
            Mode::Parallel => {
                let ics_needed = run.count.div_ceil(COMPONENTS_PER_IC);

                for ic_index in 0..ics_needed {
                    if remaining.as_slice().is_empty() {
                        break;
                    }
                    let in_this_ic = COMPONENTS_PER_IC.min(run.count - ic_index * COMPONENTS_PER_IC);
                    let single_remainder = in_this_ic == 1 && policy == RemainderPolicy::SingleAsSeries;
                    let ic_mode = if single_remainder { Mode::Series } else { Mode::Parallel };

                    let ic_components: Vec<PlacedComponent> = remaining
                        .by_ref()
                        .take(in_this_ic)
                        .map(|c| placed_as(c, ic_mode))
                        .collect();

                    placements.push(IcPlacement {
                        ic_number,
                        mode: ic_mode,
                        components: ic_components,
                        is_parallel: !single_remainder,
                    });
                    ic_number += 1;
                }
            }
        }
    }

    placements
}

fn placed_as(component: &PlacedComponent, mode: Mode) -> PlacedComponent {
    PlacedComponent {
        mode,
        ..component.clone()
    }
}
