//! Maps raw defect wordings onto canonical component groups.
//!
//! Groups are tried in table order and, within a group, patterns in their listed order.
//! The first group with any matching pattern wins. A table where one wording can match two
//! groups is rejected when it is compiled, so first-match-wins only ever decides between
//! patterns the curator has declared disjoint.

use std::collections::{BTreeMap, HashSet};

use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::engine::config::{ConfigError, GroupSpec, PatternSpec};

#[derive(Debug, Clone)]
enum Pattern {
    /// Stored lower-cased.
    Contains(String),
    Regex(Regex),
}

impl Pattern {
    fn compile(group: &str, spec: &PatternSpec) -> Result<Self, ConfigError> {
        if spec.source().trim().is_empty() {
            return Err(ConfigError::EmptyPattern(group.to_string()));
        }

        match spec {
            PatternSpec::Contains(value) => Ok(Self::Contains(value.to_lowercase())),
            PatternSpec::Regex(value) => RegexBuilder::new(value)
                .case_insensitive(true)
                .build()
                .map(Self::Regex)
                .map_err(|source| ConfigError::InvalidRegex {
                    group: group.to_string(),
                    pattern: value.clone(),
                    source,
                }),
        }
    }

    fn matches(&self, raw: &str, lowered: &str) -> bool {
        match self {
            Self::Contains(needle) => lowered.contains(needle.as_str()),
            Self::Regex(regex) => regex.is_match(raw),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ComponentGroup {
    pub canonical_name: String,
    pub category: String,
    patterns: Vec<Pattern>,
}

impl ComponentGroup {
    fn matches_lowered(&self, raw: &str, lowered: &str) -> bool {
        self.patterns
            .iter()
            .any(|pattern| pattern.matches(raw, lowered))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GroupAssignment {
    /// Group canonical name, or the description itself when ungrouped.
    pub canonical_name: String,
    pub category: String,
    pub group_index: Option<usize>,
}

impl GroupAssignment {
    pub fn is_grouped(&self) -> bool {
        self.group_index.is_some()
    }

    pub fn subject(&self) -> SubjectId {
        SubjectId {
            group_index: self.group_index,
            name: self.canonical_name.clone(),
        }
    }
}

/// Identity of a scored subject. A raw wording that happens to read like a group's
/// canonical name is still a different subject from that group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubjectId {
    pub group_index: Option<usize>,
    pub name: String,
}

/// A description that more than one group claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupConflict {
    pub description: String,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GroupTable {
    groups: Vec<ComponentGroup>,
}

impl GroupTable {
    pub fn compile(specs: &[GroupSpec]) -> Result<Self, ConfigError> {
        let mut seen = HashSet::<String>::new();
        let mut groups = Vec::with_capacity(specs.len());

        for (index, spec) in specs.iter().enumerate() {
            let name = spec.canonical_name.trim();
            if name.is_empty() {
                return Err(ConfigError::EmptyCanonicalName { index });
            }
            if !seen.insert(name.to_lowercase()) {
                return Err(ConfigError::DuplicateGroup(name.to_string()));
            }
            if spec.patterns.is_empty() {
                return Err(ConfigError::NoPatterns(name.to_string()));
            }

            let patterns = spec
                .patterns
                .iter()
                .map(|pattern| Pattern::compile(name, pattern))
                .collect::<Result<Vec<Pattern>, ConfigError>>()?;

            groups.push(ComponentGroup {
                canonical_name: name.to_string(),
                category: spec.category.trim().to_string(),
                patterns,
            });
        }

        check_overlapping_substrings(specs)?;

        let table = Self { groups };
        table.check_examples(specs)?;
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn groups(&self) -> &[ComponentGroup] {
        &self.groups
    }

    /// Total and deterministic: unmatched wordings map to themselves.
    pub fn group(&self, description: &str, observed_category: &str) -> GroupAssignment {
        let lowered = description.to_lowercase();
        match self.first_match(description, &lowered) {
            Some(index) => {
                let group = &self.groups[index];
                GroupAssignment {
                    canonical_name: group.canonical_name.clone(),
                    category: group.category.clone(),
                    group_index: Some(index),
                }
            }
            None => GroupAssignment {
                canonical_name: description.to_string(),
                category: observed_category.to_string(),
                group_index: None,
            },
        }
    }

    fn first_match(&self, raw: &str, lowered: &str) -> Option<usize> {
        self.groups
            .iter()
            .position(|group| group.matches_lowered(raw, lowered))
    }

    fn matching_groups(&self, raw: &str) -> Vec<usize> {
        let lowered = raw.to_lowercase();
        self.groups
            .iter()
            .enumerate()
            .filter(|(_, group)| group.matches_lowered(raw, &lowered))
            .map(|(index, _)| index)
            .collect()
    }

    /// Descriptions claimed by more than one group, in input order.
    pub fn find_conflicts<'a, I>(&self, descriptions: I) -> Vec<GroupConflict>
    where
        I: IntoIterator<Item = &'a str>,
    {
        descriptions
            .into_iter()
            .filter_map(|description| {
                let matched = self.matching_groups(description);
                (matched.len() > 1).then(|| GroupConflict {
                    description: description.to_string(),
                    groups: matched
                        .into_iter()
                        .map(|index| self.groups[index].canonical_name.clone())
                        .collect(),
                })
            })
            .collect()
    }

    /// Counts how many descriptions land in each group; ungrouped ones are keyed `None`.
    pub fn coverage<'a, I>(&self, descriptions: I) -> BTreeMap<Option<String>, usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut counts = BTreeMap::new();
        for description in descriptions {
            let assignment = self.group(description, "");
            let key = assignment.is_grouped().then_some(assignment.canonical_name);
            *counts.entry(key).or_insert(0) += 1;
        }
        counts
    }

    fn check_examples(&self, specs: &[GroupSpec]) -> Result<(), ConfigError> {
        for (index, spec) in specs.iter().enumerate() {
            let group_name = &self.groups[index].canonical_name;
            for example in &spec.examples {
                let matched = self.matching_groups(example);
                match matched.as_slice() {
                    [only] if *only == index => {}
                    [] => {
                        return Err(ConfigError::ExampleMismatch {
                            group: group_name.clone(),
                            example: example.clone(),
                            matched: None,
                        });
                    }
                    [first] => {
                        return Err(ConfigError::ExampleMismatch {
                            group: group_name.clone(),
                            example: example.clone(),
                            matched: Some(self.groups[*first].canonical_name.clone()),
                        });
                    }
                    [first, second, ..] => {
                        return Err(ConfigError::AmbiguousExample {
                            example: example.clone(),
                            first: self.groups[*first].canonical_name.clone(),
                            second: self.groups[*second].canonical_name.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// A substring pattern containing another group's substring pattern can never match
/// without the other one matching too.
fn check_overlapping_substrings(specs: &[GroupSpec]) -> Result<(), ConfigError> {
    let substrings = specs
        .iter()
        .map(|spec| {
            spec.patterns
                .iter()
                .filter_map(|pattern| match pattern {
                    PatternSpec::Contains(value) => Some(value.to_lowercase()),
                    PatternSpec::Regex(_) => None,
                })
                .collect::<Vec<String>>()
        })
        .collect::<Vec<Vec<String>>>();

    for (left_index, left) in substrings.iter().enumerate() {
        for (right_index, right) in substrings.iter().enumerate().skip(left_index + 1) {
            for left_pattern in left {
                for right_pattern in right {
                    if left_pattern.contains(right_pattern.as_str())
                        || right_pattern.contains(left_pattern.as_str())
                    {
                        return Err(ConfigError::AmbiguousPatterns {
                            first: specs[left_index].canonical_name.clone(),
                            pattern: left_pattern.clone(),
                            second: specs[right_index].canonical_name.clone(),
                            other_pattern: right_pattern.clone(),
                        });
                    }
                }
            }
        }
    }
    Ok(())
}
