//! Compiled decision trees shared by every model family.
//!
//! Each family parses its own artifact format and lowers it into
//! [`DecisionTree`]s; evaluation and path-dependent TreeSHAP then run on
//! this one representation, so attributions and scores always come from
//! the same decision function.

use torsight_features::FEATURE_COUNT;

/// Comparison a split applies to route a value to the left child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitOp {
    /// `x < threshold` goes left.
    Lt,
    /// `x <= threshold` goes left.
    Le,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        op: SplitOp,
        left: usize,
        right: usize,
        /// Where a NaN input goes.
        default_left: bool,
        cover: f64,
    },
    Leaf {
        value: f64,
        cover: f64,
    },
}

impl Node {
    pub fn cover(&self) -> f64 {
        match self {
            Node::Split { cover, .. } | Node::Leaf { cover, .. } => *cover,
        }
    }
}

/// A validated binary tree; node 0 is the root.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

const MAX_TREE_DEPTH: usize = 64;

impl DecisionTree {
    /// Validate structure: children in range, every node reachable exactly
    /// once from the root, features inside the layout, positive finite covers.
    pub fn new(nodes: Vec<Node>) -> Result<Self, String> {
        if nodes.is_empty() {
            return Err("tree has no nodes".into());
        }
        let mut seen = vec![false; nodes.len()];
        let mut stack = vec![(0usize, 0usize)];
        while let Some((index, depth)) = stack.pop() {
            if depth > MAX_TREE_DEPTH {
                return Err(format!("tree deeper than {MAX_TREE_DEPTH}"));
            }
            let node = nodes
                .get(index)
                .ok_or_else(|| format!("child index {index} out of range"))?;
            if std::mem::replace(&mut seen[index], true) {
                return Err(format!("node {index} is reachable more than once"));
            }
            let cover = node.cover();
            if !(cover.is_finite() && cover > 0.0) {
                return Err(format!("node {index} has non-positive cover {cover}"));
            }
            match node {
                Node::Split { feature, threshold, left, right, .. } => {
                    if *feature >= FEATURE_COUNT {
                        return Err(format!("node {index} splits on feature {feature} outside the layout"));
                    }
                    if threshold.is_nan() {
                        return Err(format!("node {index} has a NaN threshold"));
                    }
                    stack.push((*left, depth + 1));
                    stack.push((*right, depth + 1));
                }
                Node::Leaf { value, .. } => {
                    if !value.is_finite() {
                        return Err(format!("leaf {index} has non-finite value"));
                    }
                }
            }
        }
        if let Some(orphan) = seen.iter().position(|s| !s) {
            return Err(format!("node {orphan} is unreachable from the root"));
        }
        Ok(Self { nodes })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    fn goes_left(&self, node: &Node, x: &[f64]) -> bool {
        match node {
            Node::Split { feature, threshold, op, default_left, .. } => {
                let value = x[*feature];
                if value.is_nan() {
                    *default_left
                } else {
                    match op {
                        SplitOp::Lt => value < *threshold,
                        SplitOp::Le => value <= *threshold,
                    }
                }
            }
            Node::Leaf { .. } => false,
        }
    }

    pub fn predict(&self, x: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            let node = &self.nodes[index];
            match node {
                Node::Leaf { value, .. } => return *value,
                Node::Split { left, right, .. } => {
                    index = if self.goes_left(node, x) { *left } else { *right };
                }
            }
        }
    }

    /// Cover-weighted mean leaf value: the tree's output with no feature known.
    pub fn expected_value(&self) -> f64 {
        self.expected_from(0)
    }

    fn expected_from(&self, index: usize) -> f64 {
        match &self.nodes[index] {
            Node::Leaf { value, .. } => *value,
            Node::Split { left, right, .. } => {
                let (wl, wr) = self.child_fractions(*left, *right);
                wl * self.expected_from(*left) + wr * self.expected_from(*right)
            }
        }
    }

    fn child_fractions(&self, left: usize, right: usize) -> (f64, f64) {
        let (cl, cr) = (self.nodes[left].cover(), self.nodes[right].cover());
        let total = cl + cr;
        (cl / total, cr / total)
    }

    /// Add this tree's path-dependent SHAP values for `x` into `phi`.
    ///
    /// `Σ phi` over the call equals `predict(x) - expected_value()`.
    pub fn accumulate_shap(&self, x: &[f64], phi: &mut [f64]) {
        self.shap_recurse(0, x, phi, Vec::with_capacity(8), 1.0, 1.0, None);
    }

    #[allow(clippy::too_many_arguments)]
    fn shap_recurse(
        &self,
        index: usize,
        x: &[f64],
        phi: &mut [f64],
        mut path: Vec<PathElement>,
        zero_fraction: f64,
        one_fraction: f64,
        feature: Option<usize>,
    ) {
        extend_path(&mut path, zero_fraction, one_fraction, feature);

        let node = &self.nodes[index];
        match node {
            Node::Leaf { value, .. } => {
                for i in 1..path.len() {
                    let weight = unwound_path_sum(&path, i);
                    let element = path[i];
                    if let Some(f) = element.feature {
                        phi[f] += weight * (element.one_fraction - element.zero_fraction) * value;
                    }
                }
            }
            Node::Split { feature: split, left, right, .. } => {
                let (hot, cold) = if self.goes_left(node, x) {
                    (*left, *right)
                } else {
                    (*right, *left)
                };
                let (left_fraction, right_fraction) = self.child_fractions(*left, *right);
                let (hot_zero, cold_zero) = if hot == *left {
                    (left_fraction, right_fraction)
                } else {
                    (right_fraction, left_fraction)
                };

                // A feature already on the path is unwound and re-split here.
                let mut incoming_zero = 1.0;
                let mut incoming_one = 1.0;
                if let Some(k) = path.iter().position(|e| e.feature == Some(*split)) {
                    incoming_zero = path[k].zero_fraction;
                    incoming_one = path[k].one_fraction;
                    unwind_path(&mut path, k);
                }

                self.shap_recurse(
                    hot,
                    x,
                    phi,
                    path.clone(),
                    hot_zero * incoming_zero,
                    incoming_one,
                    Some(*split),
                );
                self.shap_recurse(cold, x, phi, path, cold_zero * incoming_zero, 0.0, Some(*split));
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    weight: f64,
}

fn extend_path(path: &mut Vec<PathElement>, zero_fraction: f64, one_fraction: f64, feature: Option<usize>) {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        weight: if depth == 0 { 1.0 } else { 0.0 },
    });
    let denom = (depth + 1) as f64;
    for i in (0..depth).rev() {
        path[i + 1].weight += one_fraction * path[i].weight * (i + 1) as f64 / denom;
        path[i].weight = zero_fraction * path[i].weight * (depth - i) as f64 / denom;
    }
}

fn unwind_path(path: &mut Vec<PathElement>, index: usize) {
    let depth = path.len() - 1;
    let PathElement { zero_fraction, one_fraction, .. } = path[index];
    let denom = (depth + 1) as f64;
    let mut next = path[depth].weight;
    for i in (0..depth).rev() {
        if one_fraction != 0.0 {
            let tmp = path[i].weight;
            path[i].weight = next * denom / ((i + 1) as f64 * one_fraction);
            next = tmp - path[i].weight * zero_fraction * (depth - i) as f64 / denom;
        } else {
            path[i].weight = path[i].weight * denom / (zero_fraction * (depth - i) as f64);
        }
    }
    for i in index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.pop();
}

/// Total path weight with element `index` removed, without mutating the path.
fn unwound_path_sum(path: &[PathElement], index: usize) -> f64 {
    let depth = path.len() - 1;
    let PathElement { zero_fraction, one_fraction, .. } = path[index];
    let denom = (depth + 1) as f64;
    let mut next = path[depth].weight;
    let mut total = 0.0;
    for i in (0..depth).rev() {
        if one_fraction != 0.0 {
            let tmp = next * denom / ((i + 1) as f64 * one_fraction);
            total += tmp;
            next = path[i].weight - tmp * zero_fraction * (depth - i) as f64 / denom;
        } else {
            total += path[i].weight / zero_fraction / ((depth - i) as f64 / denom);
        }
    }
    total
}

/// One class's additive forest in margin space.
#[derive(Debug, Clone)]
pub struct ClassForest {
    pub guard_index: u32,
    pub base_margin: f64,
    pub trees: Vec<DecisionTree>,
}

impl ClassForest {
    pub fn margin(&self, x: &[f64]) -> f64 {
        self.base_margin + self.trees.iter().map(|t| t.predict(x)).sum::<f64>()
    }

    pub fn expected_margin(&self) -> f64 {
        self.base_margin + self.trees.iter().map(|t| t.expected_value()).sum::<f64>()
    }

    /// Per-feature margin contributions summing to `margin(x) - expected_margin()`.
    pub fn margin_shap(&self, x: &[f64]) -> Vec<f64> {
        let mut phi = vec![0.0; FEATURE_COUNT];
        for tree in &self.trees {
            tree.accumulate_shap(x, &mut phi);
        }
        phi
    }
}

pub fn sigmoid(margin: f64) -> f64 {
    1.0 / (1.0 + (-margin).exp())
}

pub fn logit(probability: f64) -> f64 {
    (probability / (1.0 - probability)).ln()
}

/// Map margin-space contributions into probability space.
///
/// Scaling by the secant of the logistic link between the expected margin
/// and the actual margin keeps the contributions exactly additive:
/// `Σ result = sigmoid(margin) - sigmoid(expected_margin)`.
pub fn margin_to_score_space(phi: &[f64], margin: f64, expected_margin: f64) -> Vec<f64> {
    let delta = margin - expected_margin;
    let slope = if delta.abs() < 1e-9 {
        let s = sigmoid(margin);
        s * (1.0 - s)
    } else {
        (sigmoid(margin) - sigmoid(expected_margin)) / delta
    };
    phi.iter().map(|p| p * slope).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(value: f64, cover: f64) -> Node {
        Node::Leaf { value, cover }
    }

    fn split(feature: usize, threshold: f64, left: usize, right: usize, cover: f64) -> Node {
        Node::Split { feature, threshold, op: SplitOp::Lt, left, right, default_left: true, cover }
    }

    /// Depth-2 tree splitting on feature 0 then feature 1 (left) / feature 0 again (right).
    fn sample_tree() -> DecisionTree {
        DecisionTree::new(vec![
            split(0, 5.0, 1, 2, 100.0),
            split(1, 1.0, 3, 4, 60.0),
            split(0, 8.0, 5, 6, 40.0),
            leaf(-1.0, 20.0),
            leaf(0.5, 40.0),
            leaf(2.0, 30.0),
            leaf(3.0, 10.0),
        ])
        .unwrap()
    }

    fn features(pairs: &[(usize, f64)]) -> Vec<f64> {
        let mut x = vec![0.0; FEATURE_COUNT];
        for &(i, v) in pairs {
            x[i] = v;
        }
        x
    }

    #[test]
    fn test_predict_routes() {
        let tree = sample_tree();
        assert_eq!(tree.predict(&features(&[(0, 1.0), (1, 0.0)])), -1.0);
        assert_eq!(tree.predict(&features(&[(0, 1.0), (1, 2.0)])), 0.5);
        assert_eq!(tree.predict(&features(&[(0, 6.0)])), 2.0);
        assert_eq!(tree.predict(&features(&[(0, 9.0)])), 3.0);
    }

    #[test]
    fn test_nan_follows_default() {
        let tree = sample_tree();
        assert_eq!(tree.predict(&features(&[(0, f64::NAN), (1, 0.0)])), -1.0);
    }

    #[test]
    fn test_expected_value_is_cover_weighted() {
        let tree = sample_tree();
        // 0.6 * (1/3 * -1 + 2/3 * 0.5) + 0.4 * (0.75 * 2 + 0.25 * 3)
        let expected = 0.6 * 0.0 + 0.4 * 2.25;
        assert!((tree.expected_value() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_shap_is_additive() {
        let tree = sample_tree();
        for x in [
            features(&[(0, 1.0), (1, 0.0)]),
            features(&[(0, 1.0), (1, 3.0)]),
            features(&[(0, 6.0), (1, 0.0)]),
            features(&[(0, 9.0), (1, 3.0)]),
        ] {
            let mut phi = vec![0.0; FEATURE_COUNT];
            tree.accumulate_shap(&x, &mut phi);
            let total: f64 = phi.iter().sum();
            assert!(
                (total - (tree.predict(&x) - tree.expected_value())).abs() < 1e-9,
                "sum {total} for {:?}",
                &x[..2]
            );
            assert!(phi[2..].iter().all(|p| *p == 0.0));
        }
    }

    #[test]
    fn test_single_split_shap_matches_closed_form() {
        let tree = DecisionTree::new(vec![
            split(3, 0.5, 1, 2, 10.0),
            leaf(1.0, 4.0),
            leaf(-1.0, 6.0),
        ])
        .unwrap();
        let x = features(&[(3, 0.0)]);
        let mut phi = vec![0.0; FEATURE_COUNT];
        tree.accumulate_shap(&x, &mut phi);
        // E = 0.4 - 0.6 = -0.2; f(x) = 1.0
        assert!((phi[3] - 1.2).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_trees_rejected() {
        assert!(DecisionTree::new(vec![]).is_err());
        assert!(DecisionTree::new(vec![split(0, 1.0, 1, 5, 1.0), leaf(0.0, 1.0)]).is_err());
        assert!(DecisionTree::new(vec![split(0, 1.0, 1, 1, 1.0), leaf(0.0, 1.0)]).is_err());
        assert!(DecisionTree::new(vec![leaf(0.0, 0.0)]).is_err());
        assert!(DecisionTree::new(vec![split(FEATURE_COUNT, 1.0, 1, 2, 1.0), leaf(0.0, 1.0), leaf(0.0, 1.0)]).is_err());
        assert!(DecisionTree::new(vec![leaf(0.0, 1.0), leaf(1.0, 1.0)]).is_err());
    }

    #[test]
    fn test_secant_mapping_is_exactly_additive() {
        let phi = vec![0.7, -0.2, 0.4];
        let (m0, m) = (-0.5, 0.4);
        let mapped = margin_to_score_space(&phi, m, m0);
        let total: f64 = mapped.iter().sum();
        assert!((total - (sigmoid(m) - sigmoid(m0))).abs() < 1e-12);
    }

    #[test]
    fn test_logit_inverts_sigmoid() {
        assert!((sigmoid(logit(0.3)) - 0.3).abs() < 1e-12);
        assert_eq!(sigmoid(0.0), 0.5);
    }
}
