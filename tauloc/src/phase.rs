//! Phase codes, phase groups, and categorical phase flags.
//!
//! Phase codes are manipulated through a structured `(segment, decoration)`
//! representation instead of raw substring edits: `PKPab` is the segment
//! `PKP` decorated with the `ab` branch letter, and relabeling it to
//! `PKPbc` or stripping it to its segment code are operations on that
//! structure.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::BufRead;

use crate::error::{Error, Result};

/// Branch decorations that may trail a phase segment code.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Decoration {
    /// Retrograde branch of a caustic pair.
    Ab,
    /// Prograde branch of a caustic pair.
    Bc,
    /// Inner-core branch.
    Df,
    /// Outer-core branch of SKS-like phases.
    Ac,
    /// Upper-crustal leg.
    G,
    /// Lower-crustal leg.
    B,
    /// Head wave along the Moho.
    N,
    /// Diffraction along a discontinuity.
    Dif,
    /// Scattered precursor.
    Pre,
}

impl Decoration {
    const TABLE: [(&'static str, Self); 9] = [
        ("pre", Self::Pre),
        ("dif", Self::Dif),
        ("ab", Self::Ab),
        ("ac", Self::Ac),
        ("bc", Self::Bc),
        ("df", Self::Df),
        ("g", Self::G),
        ("b", Self::B),
        ("n", Self::N),
    ];

    const fn text(self) -> &'static str {
        match self {
            Self::Ab => "ab",
            Self::Bc => "bc",
            Self::Df => "df",
            Self::Ac => "ac",
            Self::G => "g",
            Self::B => "b",
            Self::N => "n",
            Self::Dif => "dif",
            Self::Pre => "pre",
        }
    }
}

/// Whether a phase arrives at the station as a compressional or a shear
/// wave, judged from the last body-wave leg of its code.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ArrivalType {
    /// Compressional.
    P,
    /// Shear.
    S,
    /// Surface waves and anything else.
    Other,
}

/// A phase code split into its travel-time segment and branch decoration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PhaseDesc {
    /// Segment code, e.g. `PKP` for `PKPab`.
    pub segment: String,
    /// Trailing branch decoration, when present.
    pub decoration: Option<Decoration>,
}

impl PhaseDesc {
    /// Split a phase code. Surface-wave codes keep their full name as the
    /// segment.
    #[must_use]
    pub fn parse(code: &str) -> Self {
        if code == "Lg" || code == "LR" {
            return Self {
                segment: code.to_owned(),
                decoration: None,
            };
        }
        for (text, deco) in Decoration::TABLE {
            if let Some(segment) = code.strip_suffix(text) {
                // A bare decoration is not a phase code.
                if !segment.is_empty() {
                    return Self {
                        segment: segment.to_owned(),
                        decoration: Some(deco),
                    };
                }
            }
        }
        Self {
            segment: code.to_owned(),
            decoration: None,
        }
    }

    /// Relabel the retrograde branch as its prograde partner, used when an
    /// `ab` arrival comes out below the caustic slowness.
    #[must_use]
    pub fn to_bc(&self) -> Self {
        Self {
            segment: self.segment.clone(),
            decoration: match self.decoration {
                Some(Decoration::Ab) => Some(Decoration::Bc),
                other => other,
            },
        }
    }

    /// Wave type of the final leg reaching the station.
    #[must_use]
    pub fn arrival_type(&self) -> ArrivalType {
        for c in self.segment.chars().rev() {
            match c {
                'P' | 'p' => return ArrivalType::P,
                'S' | 's' => return ArrivalType::S,
                _ => {}
            }
        }
        ArrivalType::Other
    }
}

impl fmt::Display for PhaseDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segment)?;
        if let Some(deco) = self.decoration {
            write!(f, "{}", deco.text())?;
        }
        Ok(())
    }
}

bitflags! {
    /// Categorical flags a phase can carry, defined by the four singleton
    /// groups of the group file.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
    pub struct PhaseFlags: u8 {
        /// Crustal or uppermost-mantle phase only observed regionally.
        const REGIONAL = 0b0001;
        /// Depth phase useful for constraining the source depth.
        const DEPTH = 0b0010;
        /// May be used in a location.
        const CAN_USE = 0b0100;
        /// Usable but down-weighted in the identification.
        const DOWN_WEIGHT = 0b1000;
    }
}

/// One named phase group.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PhaseGroup {
    /// Group name.
    pub name: String,
    /// Ordered member phase codes.
    pub phases: Vec<String>,
}

impl PhaseGroup {
    fn contains(&self, phase: &str) -> bool {
        self.phases.iter().any(|p| p == phase)
    }
}

/// The group forest: four singleton categorical groups plus the
/// primary/auxiliary pairs used by the phase identification.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PhaseGroups {
    regional: PhaseGroup,
    depth: PhaseGroup,
    down_weight: PhaseGroup,
    can_use: PhaseGroup,
    /// Pairs of (primary, optional auxiliary).
    pairs: Vec<(PhaseGroup, Option<PhaseGroup>)>,
}

/// Group names with special roles.
const GROUP_ALL: &str = "all";
const GROUP_P_LOCAL: &str = "Ploc";
const SINGLETONS: [&str; 4] = ["regional", "depth", "downWeight", "canUse"];

impl PhaseGroups {
    /// The built-in group set matching the standard distribution files.
    #[must_use]
    pub fn standard() -> Self {
        let group = |name: &str, phases: &[&str]| PhaseGroup {
            name: name.to_owned(),
            phases: phases.iter().map(|&p| p.to_owned()).collect(),
        };
        Self {
            regional: group("regional", &["Pg", "Pb", "Pn", "Sg", "Sb", "Sn", "Lg"]),
            depth: group("depth", &["pP", "sP", "pwP", "pS", "sS"]),
            down_weight: group("downWeight", &["Pdif", "Sdif", "PKPpre", "Lg", "LR"]),
            can_use: group(
                "canUse",
                &[
                    "P", "Pg", "Pb", "Pn", "Pdif", "S", "Sg", "Sb", "Sn", "pP", "sP", "pwP", "pS",
                    "sS", "PcP", "ScS", "ScP", "PKPdf", "PKPbc", "PKPab", "PKiKP", "SKSac",
                    "SKiKS", "PP", "SS",
                ],
            ),
            pairs: vec![
                (
                    group("P", &["P", "pP", "sP", "pwP", "Pdif"]),
                    Some(group("PKP", &["PKPdf", "PKPbc", "PKPab", "PKiKP", "PKPpre"])),
                ),
                (group(GROUP_P_LOCAL, &["Pg", "Pb", "Pn", "P"]), None),
                (
                    group("S", &["S", "sS", "pS", "Sdif"]),
                    Some(group("SKS", &["SKSac", "SKiKS", "SPn"])),
                ),
                (group("Sloc", &["Sg", "Sb", "Sn", "Lg", "S"]), None),
                (
                    group("PcP", &["PcP"]),
                    Some(group("ScS", &["ScS", "ScP", "ScSp"])),
                ),
                (
                    group("PP", &["PP", "pPP", "sPP"]),
                    Some(group("SS", &["SS", "sSS", "pSS"])),
                ),
                (group("LR", &["LR"]), None),
            ],
        }
    }

    /// Parse a phase-group file: tokens separated by spaces or colons, one
    /// `name: ph1 ph2 ... -` block per group; the four singleton names fill
    /// the categorical groups and the remaining groups pair up in file
    /// order.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::TableIntegrity`] when a block has no name or a
    /// singleton appears twice.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut tokens: Vec<String> = Vec::new();
        for line in reader.lines() {
            let line = line?;
            tokens.extend(
                line.split([' ', '\t', ':'])
                    .filter(|t| !t.is_empty())
                    .map(str::to_owned),
            );
        }

        let mut groups: Vec<PhaseGroup> = Vec::new();
        let mut current: Option<PhaseGroup> = None;
        for token in tokens {
            if token == "-" {
                let group = current.take().ok_or_else(|| {
                    Error::TableIntegrity("phase group delimiter without a group".into())
                })?;
                groups.push(group);
            } else if let Some(group) = current.as_mut() {
                group.phases.push(token);
            } else {
                current = Some(PhaseGroup {
                    name: token,
                    phases: Vec::new(),
                });
            }
        }
        if let Some(group) = current {
            groups.push(group);
        }

        let mut singles: [Option<PhaseGroup>; 4] = [None, None, None, None];
        let mut rest: Vec<PhaseGroup> = Vec::new();
        for group in groups {
            if let Some(slot) = SINGLETONS.iter().position(|&s| s == group.name) {
                if singles[slot].is_some() {
                    return Err(Error::TableIntegrity(format!(
                        "duplicate singleton group {}",
                        group.name
                    )));
                }
                singles[slot] = Some(group);
            } else {
                rest.push(group);
            }
        }

        let empty = |name: &str| PhaseGroup {
            name: name.to_owned(),
            phases: Vec::new(),
        };
        let [regional, depth, down_weight, can_use] = singles;
        let mut pairs = Vec::new();
        let mut iter = rest.into_iter();
        while let Some(primary) = iter.next() {
            pairs.push((primary, iter.next()));
        }
        Ok(Self {
            regional: regional.unwrap_or_else(|| empty("regional")),
            depth: depth.unwrap_or_else(|| empty("depth")),
            down_weight: down_weight.unwrap_or_else(|| empty("downWeight")),
            can_use: can_use.unwrap_or_else(|| empty("canUse")),
            pairs,
        })
    }

    /// Name of the group a phase belongs to.
    ///
    /// An empty code matches everything (`"all"`), and a bare `P` from an
    /// automatic picker means "any local P" rather than teleseismic P.
    #[must_use]
    pub fn find_group(&self, phase: &str, is_auto: bool) -> &str {
        if phase.is_empty() {
            return GROUP_ALL;
        }
        if phase == "P" && is_auto {
            return GROUP_P_LOCAL;
        }
        for (primary, auxiliary) in &self.pairs {
            if primary.contains(phase) {
                return &primary.name;
            }
            if let Some(aux) = auxiliary
                && aux.contains(phase)
            {
                return &aux.name;
            }
        }
        GROUP_ALL
    }

    /// Whether the named group lists a phase. The `"all"` group contains
    /// everything.
    #[must_use]
    pub fn group_contains(&self, name: &str, phase: &str) -> bool {
        if name == GROUP_ALL {
            return true;
        }
        for (primary, auxiliary) in &self.pairs {
            if primary.name == name {
                return primary.contains(phase);
            }
            if let Some(aux) = auxiliary
                && aux.name == name
            {
                return aux.contains(phase);
            }
        }
        false
    }

    /// The complementary group of a primary/auxiliary pair, if any.
    #[must_use]
    pub fn comp_group(&self, name: &str) -> Option<&str> {
        for (primary, auxiliary) in &self.pairs {
            if primary.name == name {
                return auxiliary.as_ref().map(|g| g.name.as_str());
            }
            if let Some(aux) = auxiliary
                && aux.name == name
            {
                return Some(&primary.name);
            }
        }
        None
    }

    /// Categorical flags of a phase.
    #[must_use]
    pub fn flags(&self, phase: &str) -> PhaseFlags {
        let mut flags = PhaseFlags::empty();
        if self.regional.contains(phase) {
            flags |= PhaseFlags::REGIONAL;
        }
        if self.depth.contains(phase) {
            flags |= PhaseFlags::DEPTH;
        }
        if self.down_weight.contains(phase) {
            flags |= PhaseFlags::DOWN_WEIGHT;
        }
        if self.can_use.contains(phase) {
            flags |= PhaseFlags::CAN_USE;
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_decorations() {
        let desc = PhaseDesc::parse("PKPab");
        assert_eq!(desc.segment, "PKP");
        assert_eq!(desc.decoration, Some(Decoration::Ab));
        assert_eq!(desc.to_string(), "PKPab");

        assert_eq!(PhaseDesc::parse("Pn").segment, "P");
        assert_eq!(PhaseDesc::parse("Pdif").decoration, Some(Decoration::Dif));
        assert_eq!(PhaseDesc::parse("PKiKP").decoration, None);
        // Surface waves keep their full code.
        assert_eq!(PhaseDesc::parse("Lg").segment, "Lg");
        assert_eq!(PhaseDesc::parse("Lg").decoration, None);
    }

    #[test]
    fn ab_relabels_to_bc() {
        let relabeled = PhaseDesc::parse("PKPab").to_bc();
        assert_eq!(relabeled.to_string(), "PKPbc");
        // Other decorations pass through.
        assert_eq!(PhaseDesc::parse("PKPdf").to_bc().to_string(), "PKPdf");
    }

    #[test]
    fn arrival_types_follow_the_last_leg() {
        assert_eq!(PhaseDesc::parse("P").arrival_type(), ArrivalType::P);
        assert_eq!(PhaseDesc::parse("pP").arrival_type(), ArrivalType::P);
        assert_eq!(PhaseDesc::parse("PcS").arrival_type(), ArrivalType::S);
        assert_eq!(PhaseDesc::parse("SKP").arrival_type(), ArrivalType::P);
        assert_eq!(PhaseDesc::parse("LR").arrival_type(), ArrivalType::Other);
    }

    #[test]
    fn group_lookup_special_rules() {
        let groups = PhaseGroups::standard();
        assert_eq!(groups.find_group("", false), "all");
        assert_eq!(groups.find_group("P", true), "Ploc");
        assert_eq!(groups.find_group("P", false), "P");
        assert_eq!(groups.find_group("Pn", false), "Ploc");
        assert_eq!(groups.find_group("PKPdf", true), "PKP");
        assert_eq!(groups.find_group("XYZ", false), "all");
    }

    #[test]
    fn complementary_groups_pair_up() {
        let groups = PhaseGroups::standard();
        assert_eq!(groups.comp_group("P"), Some("PKP"));
        assert_eq!(groups.comp_group("PKP"), Some("P"));
        assert_eq!(groups.comp_group("LR"), None);
        assert_eq!(groups.comp_group("nope"), None);
    }

    #[test]
    fn flags_come_from_the_singletons() {
        let groups = PhaseGroups::standard();
        let pn = groups.flags("Pn");
        assert!(pn.contains(PhaseFlags::REGIONAL));
        assert!(pn.contains(PhaseFlags::CAN_USE));
        assert!(!pn.contains(PhaseFlags::DEPTH));
        let pp = groups.flags("pP");
        assert!(pp.contains(PhaseFlags::DEPTH));
        let pre = groups.flags("PKPpre");
        assert!(pre.contains(PhaseFlags::DOWN_WEIGHT));
        assert!(!pre.contains(PhaseFlags::CAN_USE));
    }

    #[test]
    fn group_file_round_trip() {
        let text = "\
regional: Pg Pn -
depth: pP sP -
downWeight: Lg -
canUse: P S Pn -
P: P pP -
PKP: PKPdf PKPab -
Sloc: Sg Sn -
";
        let groups = PhaseGroups::from_reader(text.as_bytes()).unwrap();
        assert_eq!(groups.find_group("pP", false), "P");
        assert_eq!(groups.find_group("PKPab", false), "PKP");
        assert_eq!(groups.comp_group("P"), Some("PKP"));
        assert_eq!(groups.comp_group("Sloc"), None);
        assert!(groups.flags("Pn").contains(PhaseFlags::REGIONAL));
    }
}
