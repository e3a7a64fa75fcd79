//! Roll tables: a title, a die expression, then `start[-end] result` lines.
//!
//! ```text
//! Wandering Monsters Table
//! d6
//! 1-2 Goblin scout
//! 3   Ogre
//! 4-6 Nothing
//! ```
//!
//! Ranges are expanded so every die face gets its own entry.

use std::collections::BTreeMap;

use folio_core::text_utils::collapse_whitespace;
use folio_core::{RollTable, TableResult};
use regex::Regex;

/// `count` and `sides` groups; `%` is a percentile die.
pub const DEFAULT_DIE_PATTERN: &str =
    r"(?i)(?:^|[\s(\[])(?P<count>\d*)d(?P<sides>\d+|%)(?:$|[^a-z0-9])";

/// `start`, optional `end` and `text` groups.
pub const DEFAULT_RANGE_PATTERN: &str =
    r"^\s*(?P<start>\d+)(?:\s*[-–—−]\s*(?P<end>\d+))?(?:\s*[.:|)]\s*|\s+)(?P<text>\S.*?)\s*$";

const MAX_DICE: u32 = 20;
const MAX_SIDES: u32 = 1000;

/// Compiled header and entry patterns for one table category.
#[derive(Debug, Clone)]
pub struct TablePatterns {
    die: Regex,
    range: Regex,
}

/// Why a block did not produce a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableRejection {
    NoDie,
    NoEntries,
    EmptyName,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTable {
    pub name: String,
    pub table: RollTable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Die {
    formula: String,
    count: u32,
    sides: u32,
    /// Byte span of the expression within its line.
    span: (usize, usize),
}

impl Die {
    fn min_roll(&self) -> u32 {
        self.count
    }

    fn max_roll(&self) -> u32 {
        self.count * self.sides
    }
}

impl Default for TablePatterns {
    fn default() -> Self {
        // Built-in patterns are constants and always compile.
        Self::compile(None, None).unwrap()
    }
}

impl TablePatterns {
    /// Compile custom patterns, falling back to the defaults for `None`.
    pub fn compile(die: Option<&str>, range: Option<&str>) -> Result<Self, regex::Error> {
        Ok(Self {
            die: Regex::new(die.unwrap_or(DEFAULT_DIE_PATTERN))?,
            range: Regex::new(range.unwrap_or(DEFAULT_RANGE_PATTERN))?,
        })
    }

    fn die_in(&self, line: &str) -> Option<Die> {
        let caps = self.die.captures(line)?;
        let count_m = caps.name("count").or_else(|| caps.get(1));
        let sides_m = caps.name("sides").or_else(|| caps.get(2))?;

        let count = match count_m.map(|m| m.as_str()).filter(|s| !s.is_empty()) {
            Some(s) => s.parse().ok()?,
            None => 1,
        };
        let sides = match sides_m.as_str() {
            "%" => 100,
            s => s.parse().ok()?,
        };
        if count == 0 || count > MAX_DICE || sides == 0 || sides > MAX_SIDES {
            return None;
        }

        let start = count_m.map_or(sides_m.start(), |m| m.start());
        let end = sides_m.end();
        Some(Die {
            formula: line[start..end].to_string(),
            count,
            sides,
            span: (start, end),
        })
    }

    /// Parse a table block.
    ///
    /// The first non-empty line is the title. The die expression is either on
    /// the title line or alone on the next non-empty line.
    pub fn parse(&self, text: &str) -> Result<ParsedTable, TableRejection> {
        let mut lines = text
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty());

        let (title_idx, title) = lines.next().ok_or(TableRejection::NoDie)?;
        let (die, name, body_start) = match self.die_in(title) {
            Some(die) => {
                let name = strip_die(title, die.span);
                (die, name, title_idx + 1)
            }
            None => {
                let (idx, line) = lines.next().ok_or(TableRejection::NoDie)?;
                if self.range.is_match(line) {
                    return Err(TableRejection::NoDie);
                }
                let die = self.die_in(line).ok_or(TableRejection::NoDie)?;
                (die, collapse_whitespace(title), idx + 1)
            }
        };

        let percentile = die.count == 1 && die.sides == 100;
        let (min, max) = (die.min_roll(), die.max_roll());
        let mut faces: BTreeMap<u32, String> = BTreeMap::new();

        for line in text.lines().skip(body_start) {
            let Some(caps) = self.range.captures(line) else {
                continue;
            };
            let read = |group: &str| -> Option<u32> {
                let raw = caps.name(group)?.as_str();
                let n: u32 = raw.parse().ok()?;
                Some(if raw == "00" && percentile { 100 } else { n })
            };
            let Some(start) = read("start") else {
                continue;
            };
            let end = if caps.name("end").is_some() {
                match read("end") {
                    Some(e) => e,
                    None => continue,
                }
            } else {
                start
            };
            if end < start {
                tracing::debug!(line, start, end, "skipping inverted table range");
                continue;
            }
            let result = caps
                .name("text")
                .map(|m| collapse_whitespace(m.as_str()))
                .unwrap_or_default();
            if result.is_empty() {
                continue;
            }
            for face in start.max(min)..=end.min(max) {
                faces.entry(face).or_insert_with(|| result.clone());
            }
        }

        if faces.is_empty() {
            return Err(TableRejection::NoEntries);
        }
        if name.is_empty() {
            return Err(TableRejection::EmptyName);
        }

        Ok(ParsedTable {
            name,
            table: RollTable {
                formula: die.formula,
                min_roll: min,
                max_roll: max,
                results: faces
                    .into_iter()
                    .map(|(face, text)| TableResult {
                        range_start: face,
                        range_end: face,
                        text,
                    })
                    .collect(),
            },
        })
    }
}

/// Title with the die expression and any brackets around it removed.
fn strip_die(line: &str, (start, end): (usize, usize)) -> String {
    let before = line[..start].trim_end_matches(|c: char| c == '(' || c == '[' || c.is_whitespace());
    let after = line[end..].trim_start_matches(|c: char| {
        c == ')' || c == ']' || c == ':' || c.is_whitespace()
    });
    let joined = format!("{} {}", before, after);
    collapse_whitespace(joined.trim_matches(|c: char| c == ':' || c == '-' || c.is_whitespace()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(table: &RollTable) -> Vec<&str> {
        table.results.iter().map(|r| r.text.as_str()).collect()
    }

    #[test]
    fn expands_ranges_to_single_faces() {
        let parsed = TablePatterns::default()
            .parse("Wandering Monsters Table\nd6\n1-2 Goblin scout\n3 Ogre\n4-6 Nothing")
            .unwrap();
        assert_eq!(parsed.name, "Wandering Monsters Table");
        assert_eq!(parsed.table.formula, "d6");
        assert_eq!(
            texts(&parsed.table),
            vec!["Goblin scout", "Goblin scout", "Ogre", "Nothing", "Nothing", "Nothing"]
        );
        for (i, r) in parsed.table.results.iter().enumerate() {
            assert_eq!(r.range_start, i as u32 + 1);
            assert_eq!(r.range_end, i as u32 + 1);
        }
        assert!(parsed.table.is_well_formed());
    }

    #[test]
    fn die_on_title_line() {
        let parsed = TablePatterns::default()
            .parse("Trinkets (d4)\n1 A bent nail\n2 A glass eye\n3-4 Lint")
            .unwrap();
        assert_eq!(parsed.name, "Trinkets");
        assert_eq!(parsed.table.formula, "d4");
        assert_eq!(parsed.table.results.len(), 4);
    }

    #[test]
    fn multiple_dice_start_at_count() {
        let parsed = TablePatterns::default()
            .parse("Weather\n2d6\n2-6 Clear\n7-11 Rain\n12 Storm")
            .unwrap();
        assert_eq!(parsed.table.min_roll, 2);
        assert_eq!(parsed.table.max_roll, 12);
        assert_eq!(parsed.table.results.len(), 11);
        assert_eq!(parsed.table.result_for(12), Some("Storm"));
        assert!(parsed.table.is_well_formed());
    }

    #[test]
    fn percentile_double_zero_is_hundred() {
        let parsed = TablePatterns::default()
            .parse("Treasure d100\n01-50 Copper\n51-99 Silver\n00 Gold")
            .unwrap();
        assert_eq!(parsed.table.max_roll, 100);
        assert_eq!(parsed.table.result_for(100), Some("Gold"));
        assert_eq!(parsed.table.results.len(), 100);
    }

    #[test]
    fn single_zero_is_not_hundred() {
        let parsed = TablePatterns::default()
            .parse("Treasure d100\n0 Nothing\n01-99 Copper\n00 Gold")
            .unwrap();
        assert_eq!(parsed.table.result_for(100), Some("Gold"));
        assert_eq!(parsed.table.result_for(1), Some("Copper"));
        assert_eq!(parsed.table.results.len(), 100);
        assert!(parsed.table.results.iter().all(|r| r.text != "Nothing"));
    }

    #[test]
    fn out_of_range_and_duplicate_faces_dropped() {
        let parsed = TablePatterns::default()
            .parse("Loot\nd4\n1-2 Coins\n2-3 Gems\n4-9 Nothing")
            .unwrap();
        assert_eq!(texts(&parsed.table), vec!["Coins", "Coins", "Gems", "Nothing"]);
    }

    #[test]
    fn non_matching_lines_skipped() {
        let parsed = TablePatterns::default()
            .parse("Omens\nd2\nRoll when the party rests.\n1 A crow\n2 Silence")
            .unwrap();
        assert_eq!(texts(&parsed.table), vec!["A crow", "Silence"]);
    }

    #[test]
    fn rejects_without_die() {
        let err = TablePatterns::default()
            .parse("Wandering Monsters\n1 Goblin\n2 Ogre")
            .unwrap_err();
        assert_eq!(err, TableRejection::NoDie);
    }

    #[test]
    fn rejects_without_entries() {
        let err = TablePatterns::default()
            .parse("Wandering Monsters\nd6\nNothing to see here")
            .unwrap_err();
        assert_eq!(err, TableRejection::NoEntries);
    }

    #[test]
    fn custom_patterns() {
        let patterns = TablePatterns::compile(
            Some(r"Roll (?P<count>\d*)W(?P<sides>\d+)"),
            Some(r"^(?P<start>\d+)(?:\.\.(?P<end>\d+))?\s*=>\s*(?P<text>.+)$"),
        )
        .unwrap();
        let parsed = patterns
            .parse("Begegnungen\nRoll 1W3\n1..2 => Wolf\n3 => Bär")
            .unwrap();
        assert_eq!(texts(&parsed.table), vec!["Wolf", "Wolf", "Bär"]);
    }
}
