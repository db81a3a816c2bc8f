//! Natural-language rationale for an attribution.
//!
//! An explicit ordered list of condition → sentence rules. Every rule whose
//! condition holds contributes its lines, in list order; a terminal rule
//! stops evaluation. Output depends only on the attribution, never on
//! iteration order of a hash map or on wall-clock time.

use torsight_config::AttributionConfig;

use crate::attribution::{FeatureContribution, GroupImpact};

/// Contributions below this magnitude count as no signal.
const SIGNAL_EPSILON: f64 = 1e-9;

pub struct RationaleContext<'a> {
    pub guard_index: u32,
    pub score: f64,
    pub baseline: f64,
    /// Ordered by magnitude, largest first.
    pub contributions: &'a [FeatureContribution],
    pub groups: &'a [GroupImpact],
}

impl<'a> RationaleContext<'a> {
    fn signal(&self) -> impl Iterator<Item = &'a FeatureContribution> {
        self.contributions
            .iter()
            .filter(|c| c.contribution.abs() > SIGNAL_EPSILON)
    }
}

pub struct RationaleRule {
    pub name: &'static str,
    pub terminal: bool,
    pub applies: fn(&RationaleContext<'_>, &AttributionConfig) -> bool,
    pub render: fn(&RationaleContext<'_>, &AttributionConfig) -> Vec<String>,
}

pub const RATIONALE_RULES: &[RationaleRule] = &[
    RationaleRule {
        name: "no_signal",
        terminal: true,
        applies: |ctx, _| ctx.signal().next().is_none(),
        render: |ctx, _| {
            vec![format!(
                "{} sits at the model baseline of {:.3}; no feature moves its score.",
                guard_label(ctx.guard_index),
                ctx.baseline
            )]
        },
    },
    RationaleRule {
        name: "headline",
        terminal: false,
        applies: |_, _| true,
        render: |ctx, _| {
            let delta = ctx.score - ctx.baseline;
            let direction = if delta >= 0.0 { "above" } else { "below" };
            vec![format!(
                "{} scores {:.3}, {:.3} {} the baseline of {:.3}.",
                guard_label(ctx.guard_index),
                ctx.score,
                delta.abs(),
                direction,
                ctx.baseline
            )]
        },
    },
    RationaleRule {
        name: "dominant_feature",
        terminal: false,
        applies: |ctx, config| {
            ctx.signal()
                .next()
                .is_some_and(|c| c.impact_pct >= config.dominant_feature_pct)
        },
        render: |ctx, _| {
            ctx.signal()
                .next()
                .map(|c| {
                    format!(
                        "{} alone accounts for {:.1}% of the total impact.",
                        readable(&c.feature),
                        c.impact_pct
                    )
                })
                .into_iter()
                .collect()
        },
    },
    RationaleRule {
        name: "dominant_group",
        terminal: false,
        applies: |ctx, config| {
            ctx.groups
                .iter()
                .any(|g| g.impact_pct >= config.group_threshold_pct)
        },
        render: |ctx, config| {
            let mut groups: Vec<&GroupImpact> = ctx
                .groups
                .iter()
                .filter(|g| g.impact_pct >= config.group_threshold_pct)
                .collect();
            groups.sort_by(|a, b| b.impact_pct.total_cmp(&a.impact_pct));
            let listed: Vec<String> = groups
                .iter()
                .map(|g| {
                    let direction = if g.contribution >= 0.0 { "net positive" } else { "net negative" };
                    format!("{} {:.1}% ({})", g.group.label(), g.impact_pct, direction)
                })
                .collect();
            vec![format!("Most of the impact comes from {} features.", listed.join(", "))]
        },
    },
    RationaleRule {
        name: "cooccurrence_history",
        terminal: false,
        applies: |ctx, config| theme(ctx, is_cooccurrence).0 >= config.group_threshold_pct,
        render: |ctx, _| {
            let (pct, net) = theme(ctx, is_cooccurrence);
            let effect = if net >= 0.0 { "supports" } else { "weighs against" };
            vec![format!(
                "Circuit history with this exit country {effect} the candidate ({pct:.1}% of the impact)."
            )]
        },
    },
    RationaleRule {
        name: "geographic_distance",
        terminal: false,
        applies: |ctx, config| theme(ctx, is_distance).0 >= config.group_threshold_pct,
        render: |ctx, _| {
            let (pct, net) = theme(ctx, is_distance);
            let effect = if net >= 0.0 { "favours" } else { "penalises" };
            vec![format!(
                "Exit-to-guard distance {effect} the candidate ({pct:.1}% of the impact)."
            )]
        },
    },
    RationaleRule {
        name: "top_features",
        terminal: false,
        applies: |ctx, config| config.rationale_lines > 0 && ctx.signal().next().is_some(),
        render: |ctx, config| {
            ctx.signal()
                .take(config.rationale_lines)
                .map(|c| {
                    let (symbol, verb) = if c.raises_score() { ('+', "raises") } else { ('-', "lowers") };
                    format!(
                        "{symbol} {} = {:.2} {verb} the score ({symbol}{:.1}% impact)",
                        readable(&c.feature),
                        c.value,
                        c.impact_pct
                    )
                })
                .collect()
        },
    },
];

/// Apply [`RATIONALE_RULES`] in order and join the lines.
pub fn render(ctx: &RationaleContext<'_>, config: &AttributionConfig) -> String {
    let mut lines = Vec::new();
    for rule in RATIONALE_RULES {
        if !(rule.applies)(ctx, config) {
            continue;
        }
        lines.extend((rule.render)(ctx, config));
        if rule.terminal {
            break;
        }
    }
    lines.join("\n")
}

/// Summed impact share and net contribution of the features matching `member`.
fn theme(ctx: &RationaleContext<'_>, member: fn(&str) -> bool) -> (f64, f64) {
    ctx.signal()
        .filter(|c| member(&c.feature))
        .fold((0.0, 0.0), |(pct, net), c| (pct + c.impact_pct, net + c.contribution))
}

fn is_cooccurrence(feature: &str) -> bool {
    feature.contains("cooccurr")
}

fn is_distance(feature: &str) -> bool {
    feature.contains("distance") || feature.starts_with("near_share")
}

fn guard_label(guard_index: u32) -> String {
    format!("Guard_{guard_index:03}")
}

/// `exit_bandwidth` → `Exit bandwidth`
fn readable(feature: &str) -> String {
    let spaced = feature.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use torsight_features::FeatureGroup;

    fn contribution(rank: usize, feature: &str, group: FeatureGroup, value: f64, c: f64, pct: f64) -> FeatureContribution {
        FeatureContribution {
            rank,
            index: rank - 1,
            feature: feature.into(),
            group,
            value,
            contribution: c,
            impact_pct: pct,
        }
    }

    fn groups(pcts: [f64; 4]) -> Vec<GroupImpact> {
        FeatureGroup::ALL
            .into_iter()
            .zip(pcts)
            .map(|(group, impact_pct)| GroupImpact { group, contribution: 0.1, impact_pct })
            .collect()
    }

    #[test]
    fn test_rule_order_is_fixed() {
        let names: Vec<&str> = RATIONALE_RULES.iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            vec![
                "no_signal",
                "headline",
                "dominant_feature",
                "dominant_group",
                "cooccurrence_history",
                "geographic_distance",
                "top_features",
            ]
        );
    }

    #[test]
    fn test_no_signal_stops_evaluation() {
        let contributions = vec![contribution(1, "exit_bandwidth", FeatureGroup::Network, 7.5, 0.0, 0.0)];
        let groups = groups([0.0; 4]);
        let ctx = RationaleContext {
            guard_index: 4,
            score: 0.3,
            baseline: 0.3,
            contributions: &contributions,
            groups: &groups,
        };
        let text = render(&ctx, &AttributionConfig::default());
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("Guard_004 sits at the model baseline"));
    }

    #[test]
    fn test_full_rationale() {
        let contributions = vec![
            contribution(1, "exit_bandwidth", FeatureGroup::Network, 7.5, 0.12, 60.0),
            contribution(2, "hour_of_day", FeatureGroup::Temporal, 13.0, -0.06, 30.0),
            contribution(3, "cell_count", FeatureGroup::Network, 976.0, 0.02, 10.0),
        ];
        let groups = groups([70.0, 0.0, 30.0, 0.0]);
        let ctx = RationaleContext {
            guard_index: 12,
            score: 0.58,
            baseline: 0.5,
            contributions: &contributions,
            groups: &groups,
        };
        let config = AttributionConfig { rationale_lines: 2, ..AttributionConfig::default() };
        let text = render(&ctx, &config);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "Guard_012 scores 0.580, 0.080 above the baseline of 0.500.");
        assert_eq!(lines[1], "Exit bandwidth alone accounts for 60.0% of the total impact.");
        assert!(lines[2].starts_with("Most of the impact comes from network 70.0%"));
        assert!(lines[2].contains("temporal 30.0%"));
        assert_eq!(lines[3], "+ Exit bandwidth = 7.50 raises the score (+60.0% impact)");
        assert_eq!(lines[4], "- Hour of day = 13.00 lowers the score (-30.0% impact)");
        assert_eq!(render(&ctx, &config), text);
    }

    #[test]
    fn test_domain_rules() {
        let contributions = vec![
            contribution(1, "cooccurrence_total", FeatureGroup::Temporal, 8.0, 0.05, 40.0),
            contribution(2, "mean_candidate_distance_km", FeatureGroup::Geographic, 820.0, -0.03, 24.0),
            contribution(3, "log1p_cooccurrence_max", FeatureGroup::Statistical, 1.9, 0.02, 16.0),
            contribution(4, "exit_bandwidth", FeatureGroup::Network, 7.5, 0.025, 20.0),
        ];
        let groups = groups([20.0, 24.0, 40.0, 16.0]);
        let ctx = RationaleContext {
            guard_index: 1,
            score: 0.6,
            baseline: 0.535,
            contributions: &contributions,
            groups: &groups,
        };
        let config = AttributionConfig { rationale_lines: 0, ..AttributionConfig::default() };
        let text = render(&ctx, &config);
        assert!(text.contains(
            "Circuit history with this exit country supports the candidate (56.0% of the impact)."
        ));
        assert!(text.contains("Exit-to-guard distance penalises the candidate (24.0% of the impact)."));
    }

    #[test]
    fn test_readable_name() {
        assert_eq!(readable("log1p_bandwidth"), "Log1p bandwidth");
        assert_eq!(readable(""), "");
    }
}
