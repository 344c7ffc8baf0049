//! Decision-mutable values
//!
//! Bounded parameters a decision strategy tunes on an agent. Each value is
//! created with its constraint and always holds a value that satisfies it.
//! Only decision strategies may change a value, through the crate-private
//! setters below.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::error::{Result, SubstrateError};

/// Relative tolerance for positive-sum checks on float arrays
pub const SUM_REL_TOLERANCE: f64 = 1e-9;
/// Absolute tolerance for positive-sum checks on float arrays
pub const SUM_ABS_TOLERANCE: f64 = 1e-12;

/// Floating-point closeness with the tolerances above
pub fn is_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= f64::max(SUM_REL_TOLERANCE * f64::max(a.abs(), b.abs()), SUM_ABS_TOLERANCE)
}

/// Constraint applied to every element (Range) or to the whole array (PositiveSum)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ArrayConstraint<T> {
    /// Every element within `[min, max]`
    Range { min: T, max: T },
    /// Every element positive, elements add up to `sum`
    PositiveSum { sum: T },
}

/// A concrete value held by a decision-mutable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MutableValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    FloatArray(Vec<f64>),
    IntArray(Vec<i64>),
}

impl MutableValue {
    pub fn kind(&self) -> &'static str {
        match self {
            MutableValue::Float(_) => "float",
            MutableValue::Int(_) => "int",
            MutableValue::Bool(_) => "bool",
            MutableValue::FloatArray(_) => "float_array",
            MutableValue::IntArray(_) => "int_array",
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            MutableValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            MutableValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MutableValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float_array(&self) -> Option<&[f64]> {
        match self {
            MutableValue::FloatArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_int_array(&self) -> Option<&[i64]> {
        match self {
            MutableValue::IntArray(v) => Some(v),
            _ => None,
        }
    }
}

/// Transfers per element when perturbing an int positive-sum array
const PERTURB_MOVES_PER_ELEMENT: usize = 4;

/// Widest float range the random and perturbed setters can sample from
pub const MAX_FLOAT_SPAN: f64 = f64::MAX / 4.0;

/// Bounds must be finite, ordered, and no wider than [`MAX_FLOAT_SPAN`]
fn check_float_bounds(min: f64, max: f64, what: &str) -> Result<()> {
    if !(min.is_finite() && max.is_finite()) || min > max || !(max - min <= MAX_FLOAT_SPAN) {
        return Err(SubstrateError::InvalidValue(format!(
            "{} bounds [{}, {}] are degenerate",
            what, min, max
        )));
    }
    Ok(())
}

/// A bounded float
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutableFloat {
    min: f64,
    max: f64,
    value: f64,
}

impl MutableFloat {
    /// Starts at `min`.
    pub fn new(min: f64, max: f64) -> Result<Self> {
        check_float_bounds(min, max, "float")?;
        Ok(Self { min, max, value: min })
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    fn admits(&self, v: f64) -> bool {
        v.is_finite() && self.min <= v && v <= self.max
    }

    fn randomize<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.value = rng.gen_range(self.min..=self.max).clamp(self.min, self.max);
    }

    fn perturb<R: Rng + ?Sized>(&mut self, rng: &mut R, scale: f64) {
        let span = self.max - self.min;
        let window = (scale * span).min(span);
        if window > 0.0 {
            let delta = rng.gen_range(-window..=window);
            self.value = (self.value + delta).clamp(self.min, self.max);
        }
    }
}

/// A bounded integer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutableInt {
    min: i64,
    max: i64,
    value: i64,
}

impl MutableInt {
    /// Starts at `min`.
    pub fn new(min: i64, max: i64) -> Result<Self> {
        if min > max {
            return Err(SubstrateError::InvalidValue(format!(
                "int bounds [{}, {}] are degenerate",
                min, max
            )));
        }
        Ok(Self { min, max, value: min })
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn bounds(&self) -> (i64, i64) {
        (self.min, self.max)
    }

    fn admits(&self, v: i64) -> bool {
        self.min <= v && v <= self.max
    }

    fn randomize<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.value = rng.gen_range(self.min..=self.max);
    }

    fn perturb<R: Rng + ?Sized>(&mut self, rng: &mut R, scale: f64) {
        let span = self.max.saturating_sub(self.min);
        if span == 0 {
            return;
        }
        let window = ((scale * span as f64).ceil() as i64).clamp(1, span);
        let delta = rng.gen_range(-window..=window);
        self.value = self.value.saturating_add(delta).clamp(self.min, self.max);
    }
}

/// A float array under an [`ArrayConstraint`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutableFloatArray {
    constraint: ArrayConstraint<f64>,
    value: Vec<f64>,
}

impl MutableFloatArray {
    /// Starts at the lower bound (Range) or an even split of the sum (PositiveSum).
    pub fn new(len: usize, constraint: ArrayConstraint<f64>) -> Result<Self> {
        if len == 0 {
            return Err(SubstrateError::InvalidValue("float array must not be empty".into()));
        }
        let value = match constraint {
            ArrayConstraint::Range { min, max } => {
                check_float_bounds(min, max, "float array")?;
                vec![min; len]
            }
            ArrayConstraint::PositiveSum { sum } => {
                if !(sum.is_finite() && sum > 0.0) {
                    return Err(SubstrateError::InvalidValue(format!(
                        "positive-sum target must be positive, got {}",
                        sum
                    )));
                }
                vec![sum / len as f64; len]
            }
        };
        Ok(Self { constraint, value })
    }

    pub fn value(&self) -> &[f64] {
        &self.value
    }

    pub fn constraint(&self) -> ArrayConstraint<f64> {
        self.constraint
    }

    fn admits(&self, v: &[f64]) -> bool {
        if v.len() != self.value.len() || v.iter().any(|x| !x.is_finite()) {
            return false;
        }
        match self.constraint {
            ArrayConstraint::Range { min, max } => v.iter().all(|x| min <= *x && *x <= max),
            ArrayConstraint::PositiveSum { sum } => {
                v.iter().all(|x| *x > 0.0) && is_close(v.iter().sum(), sum)
            }
        }
    }

    fn randomize<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        match self.constraint {
            ArrayConstraint::Range { min, max } => {
                for x in self.value.iter_mut() {
                    *x = rng.gen_range(min..=max).clamp(min, max);
                }
            }
            ArrayConstraint::PositiveSum { sum } => {
                // Weights in (0, 1], scaled onto the target
                let weights: Vec<f64> = self.value.iter().map(|_| 1.0 - rng.gen::<f64>()).collect();
                self.value = scale_to_sum(&weights, sum);
            }
        }
    }

    fn perturb<R: Rng + ?Sized>(&mut self, rng: &mut R, scale: f64) {
        match self.constraint {
            ArrayConstraint::Range { min, max } => {
                let window = (scale * (max - min)).min(max - min);
                if window > 0.0 {
                    for x in self.value.iter_mut() {
                        *x = (*x + rng.gen_range(-window..=window)).clamp(min, max);
                    }
                }
            }
            ArrayConstraint::PositiveSum { sum } => {
                if scale <= 0.0 {
                    return;
                }
                let weights: Vec<f64> = self
                    .value
                    .iter()
                    .map(|x| x * (1.0 + rng.gen_range(-scale..=scale)).max(1e-6))
                    .collect();
                self.value = scale_to_sum(&weights, sum);
            }
        }
    }
}

fn scale_to_sum(weights: &[f64], sum: f64) -> Vec<f64> {
    let total: f64 = weights.iter().sum();
    let mut scaled: Vec<f64> = weights.iter().map(|w| w / total * sum).collect();
    // Fold the rounding residue into the largest element so the sum is as exact as f64 allows
    let residue = sum - scaled.iter().sum::<f64>();
    if let Some(largest) = scaled
        .iter_mut()
        .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
    {
        *largest += residue;
    }
    scaled
}

/// An integer array under an [`ArrayConstraint`]
///
/// For PositiveSum the elements are non-negative and add up to the target exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutableIntArray {
    constraint: ArrayConstraint<i64>,
    value: Vec<i64>,
}

impl MutableIntArray {
    /// Starts at the lower bound (Range) or an even split of the sum (PositiveSum).
    pub fn new(len: usize, constraint: ArrayConstraint<i64>) -> Result<Self> {
        if len == 0 {
            return Err(SubstrateError::InvalidValue("int array must not be empty".into()));
        }
        let value = match constraint {
            ArrayConstraint::Range { min, max } => {
                if min > max {
                    return Err(SubstrateError::InvalidValue(format!(
                        "int array bounds [{}, {}] are degenerate",
                        min, max
                    )));
                }
                vec![min; len]
            }
            ArrayConstraint::PositiveSum { sum } => {
                if sum <= 0 {
                    return Err(SubstrateError::InvalidValue(format!(
                        "positive-sum target must be positive, got {}",
                        sum
                    )));
                }
                let n = len as i64;
                (0..n).map(|i| sum / n + i64::from(i < sum % n)).collect()
            }
        };
        Ok(Self { constraint, value })
    }

    pub fn value(&self) -> &[i64] {
        &self.value
    }

    pub fn constraint(&self) -> ArrayConstraint<i64> {
        self.constraint
    }

    fn admits(&self, v: &[i64]) -> bool {
        if v.len() != self.value.len() {
            return false;
        }
        match self.constraint {
            ArrayConstraint::Range { min, max } => v.iter().all(|x| min <= *x && *x <= max),
            ArrayConstraint::PositiveSum { sum } => {
                v.iter().all(|x| *x >= 0) && v.iter().try_fold(0i64, |acc, x| acc.checked_add(*x)) == Some(sum)
            }
        }
    }

    fn randomize<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        match self.constraint {
            ArrayConstraint::Range { min, max } => {
                for x in self.value.iter_mut() {
                    *x = rng.gen_range(min..=max);
                }
            }
            ArrayConstraint::PositiveSum { sum } => {
                // Stars and bars: sorted cut points over [0, sum]
                let mut cuts: Vec<i64> = (1..self.value.len()).map(|_| rng.gen_range(0..=sum)).collect();
                cuts.sort_unstable();
                let mut previous = 0;
                for (slot, cut) in self.value.iter_mut().zip(cuts.iter().chain(std::iter::once(&sum))) {
                    *slot = cut - previous;
                    previous = *cut;
                }
            }
        }
    }

    fn perturb<R: Rng + ?Sized>(&mut self, rng: &mut R, scale: f64) {
        match self.constraint {
            ArrayConstraint::Range { min, max } => {
                let span = max.saturating_sub(min);
                if span == 0 {
                    return;
                }
                let window = ((scale * span as f64).ceil() as i64).clamp(1, span);
                for x in self.value.iter_mut() {
                    *x = x.saturating_add(rng.gen_range(-window..=window)).clamp(min, max);
                }
            }
            ArrayConstraint::PositiveSum { sum } => {
                let len = self.value.len();
                if len < 2 || scale <= 0.0 {
                    return;
                }
                // Shift bounded chunks between elements; the total never changes
                let step = ((scale * sum as f64 / len as f64).round() as i64).max(1);
                for _ in 0..len * PERTURB_MOVES_PER_ELEMENT {
                    let from = rng.gen_range(0..len);
                    let to = rng.gen_range(0..len);
                    if from != to && self.value[from] > 0 {
                        let amount = rng.gen_range(1..=step.min(self.value[from]));
                        self.value[from] -= amount;
                        self.value[to] += amount;
                    }
                }
            }
        }
    }
}

/// One degree of freedom a decision strategy tunes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DecisionMutableValue {
    Float(MutableFloat),
    Int(MutableInt),
    Bool(bool),
    FloatArray(MutableFloatArray),
    IntArray(MutableIntArray),
}

impl DecisionMutableValue {
    pub fn float(min: f64, max: f64) -> Result<Self> {
        Ok(Self::Float(MutableFloat::new(min, max)?))
    }

    pub fn int(min: i64, max: i64) -> Result<Self> {
        Ok(Self::Int(MutableInt::new(min, max)?))
    }

    pub fn boolean() -> Self {
        Self::Bool(false)
    }

    pub fn float_array(len: usize, constraint: ArrayConstraint<f64>) -> Result<Self> {
        Ok(Self::FloatArray(MutableFloatArray::new(len, constraint)?))
    }

    pub fn int_array(len: usize, constraint: ArrayConstraint<i64>) -> Result<Self> {
        Ok(Self::IntArray(MutableIntArray::new(len, constraint)?))
    }

    /// Snapshot of the held value
    pub fn value(&self) -> MutableValue {
        match self {
            Self::Float(f) => MutableValue::Float(f.value),
            Self::Int(i) => MutableValue::Int(i.value),
            Self::Bool(b) => MutableValue::Bool(*b),
            Self::FloatArray(a) => MutableValue::FloatArray(a.value.clone()),
            Self::IntArray(a) => MutableValue::IntArray(a.value.clone()),
        }
    }

    /// Whether `value` has the right shape and satisfies the constraint
    pub fn admits(&self, value: &MutableValue) -> bool {
        match (self, value) {
            (Self::Float(f), MutableValue::Float(v)) => f.admits(*v),
            (Self::Int(i), MutableValue::Int(v)) => i.admits(*v),
            (Self::Bool(_), MutableValue::Bool(_)) => true,
            (Self::FloatArray(a), MutableValue::FloatArray(v)) => a.admits(v),
            (Self::IntArray(a), MutableValue::IntArray(v)) => a.admits(v),
            _ => false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.admits(&self.value())
    }

    pub(crate) fn set_value(&mut self, value: &MutableValue) -> Result<()> {
        if !self.admits(value) {
            return Err(SubstrateError::InvalidValue(format!(
                "{:?} does not satisfy {:?}",
                value, self
            )));
        }
        match (self, value) {
            (Self::Float(f), MutableValue::Float(v)) => f.value = *v,
            (Self::Int(i), MutableValue::Int(v)) => i.value = *v,
            (Self::Bool(b), MutableValue::Bool(v)) => *b = *v,
            (Self::FloatArray(a), MutableValue::FloatArray(v)) => a.value.clone_from(v),
            (Self::IntArray(a), MutableValue::IntArray(v)) => a.value.clone_from(v),
            _ => unreachable!("admits() checked the variant"),
        }
        Ok(())
    }

    pub(crate) fn set_value_random<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        match self {
            Self::Float(f) => f.randomize(rng),
            Self::Int(i) => i.randomize(rng),
            Self::Bool(b) => *b = rng.gen(),
            Self::FloatArray(a) => a.randomize(rng),
            Self::IntArray(a) => a.randomize(rng),
        }
    }

    /// Nudge the held value by at most `scale` of its range
    ///
    /// Booleans flip with probability `scale`. `scale` is clamped to [0, 1];
    /// a non-finite scale leaves the value alone.
    pub(crate) fn set_value_perturbed<R: Rng + ?Sized>(&mut self, rng: &mut R, scale: f64) {
        if !scale.is_finite() {
            return;
        }
        let scale = scale.clamp(0.0, 1.0);
        match self {
            Self::Float(f) => f.perturb(rng, scale),
            Self::Int(i) => i.perturb(rng, scale),
            Self::Bool(b) => {
                if rng.gen_bool(scale) {
                    *b = !*b;
                }
            }
            Self::FloatArray(a) => a.perturb(rng, scale),
            Self::IntArray(a) => a.perturb(rng, scale),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn all_variants() -> Vec<DecisionMutableValue> {
        vec![
            DecisionMutableValue::float(-2.5, 7.0).unwrap(),
            DecisionMutableValue::int(-3, 12).unwrap(),
            DecisionMutableValue::boolean(),
            DecisionMutableValue::float_array(4, ArrayConstraint::Range { min: 0.0, max: 1.0 }).unwrap(),
            DecisionMutableValue::float_array(5, ArrayConstraint::PositiveSum { sum: 3.0 }).unwrap(),
            DecisionMutableValue::int_array(3, ArrayConstraint::Range { min: 1, max: 9 }).unwrap(),
            DecisionMutableValue::int_array(6, ArrayConstraint::PositiveSum { sum: 20 }).unwrap(),
        ]
    }

    #[test]
    fn test_initial_values_are_valid() {
        for value in all_variants() {
            assert!(value.is_valid(), "{:?}", value);
        }
    }

    #[test]
    fn test_random_draws_respect_constraints() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for mut value in all_variants() {
            for _ in 0..500 {
                value.set_value_random(&mut rng);
                assert!(value.is_valid(), "{:?}", value);
            }
        }
    }

    #[test]
    fn test_positive_sum_float_sums_to_target() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut value =
            DecisionMutableValue::float_array(8, ArrayConstraint::PositiveSum { sum: 10.0 }).unwrap();
        for _ in 0..500 {
            value.set_value_random(&mut rng);
            let v = value.value();
            let v = v.as_float_array().unwrap();
            assert!(is_close(v.iter().sum(), 10.0));
            assert!(v.iter().all(|x| *x > 0.0));
        }
    }

    #[test]
    fn test_positive_sum_int_is_exact() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut value =
            DecisionMutableValue::int_array(4, ArrayConstraint::PositiveSum { sum: 17 }).unwrap();
        for _ in 0..500 {
            value.set_value_random(&mut rng);
            let v = value.value();
            assert_eq!(v.as_int_array().unwrap().iter().sum::<i64>(), 17);
        }
    }

    #[test]
    fn test_perturbation_respects_constraints() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for mut value in all_variants() {
            value.set_value_random(&mut rng);
            for _ in 0..500 {
                value.set_value_perturbed(&mut rng, 0.3);
                assert!(value.is_valid(), "{:?}", value);
            }
        }
    }

    #[test]
    fn test_perturbation_stays_near() {
        let mut rng = ChaCha8Rng::seed_from_u64(13);
        let mut value = DecisionMutableValue::float(0.0, 10.0).unwrap();
        value.set_value(&MutableValue::Float(5.0)).unwrap();
        value.set_value_perturbed(&mut rng, 0.1);
        let v = value.value().as_float().unwrap();
        assert!((4.0..=6.0).contains(&v));
    }

    #[test]
    fn test_degenerate_bounds_rejected() {
        assert!(DecisionMutableValue::float(1.0, 0.0).is_err());
        assert!(DecisionMutableValue::float(f64::NAN, 1.0).is_err());
        assert!(DecisionMutableValue::int(5, 4).is_err());
        assert!(DecisionMutableValue::float_array(0, ArrayConstraint::Range { min: 0.0, max: 1.0 }).is_err());
        assert!(DecisionMutableValue::float_array(3, ArrayConstraint::PositiveSum { sum: 0.0 }).is_err());
        assert!(DecisionMutableValue::int_array(3, ArrayConstraint::PositiveSum { sum: 0 }).is_err());
        assert!(DecisionMutableValue::int_array(3, ArrayConstraint::PositiveSum { sum: -4 }).is_err());
    }

    #[test]
    fn test_unbounded_span_rejected() {
        assert!(matches!(
            DecisionMutableValue::float(-f64::MAX, f64::MAX),
            Err(SubstrateError::InvalidValue(_))
        ));
        assert!(matches!(
            DecisionMutableValue::float_array(2, ArrayConstraint::Range { min: -f64::MAX, max: f64::MAX }),
            Err(SubstrateError::InvalidValue(_))
        ));

        let half = MAX_FLOAT_SPAN / 2.0;
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut wide = DecisionMutableValue::float(-half, half).unwrap();
        for _ in 0..50 {
            wide.set_value_random(&mut rng);
            wide.set_value_perturbed(&mut rng, 0.5);
            assert!(wide.is_valid());
        }
    }

    #[test]
    fn test_int_positive_sum_perturbation_scales_to_large_targets() {
        let sum = 1_000_000_000_000_000;
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let mut value = DecisionMutableValue::int_array(5, ArrayConstraint::PositiveSum { sum }).unwrap();
        for _ in 0..100 {
            value.set_value_perturbed(&mut rng, 0.5);
            let v = value.value();
            let v = v.as_int_array().unwrap();
            assert_eq!(v.iter().sum::<i64>(), sum);
            assert!(v.iter().all(|x| *x >= 0));
        }
    }

    #[test]
    fn test_set_value_checks_shape_and_bounds() {
        let mut value = DecisionMutableValue::int(0, 10).unwrap();
        assert!(value.set_value(&MutableValue::Int(4)).is_ok());
        assert_eq!(value.value(), MutableValue::Int(4));

        assert!(value.set_value(&MutableValue::Int(11)).is_err());
        assert!(value.set_value(&MutableValue::Float(4.0)).is_err());
        assert_eq!(value.value(), MutableValue::Int(4));

        let mut array =
            DecisionMutableValue::float_array(2, ArrayConstraint::PositiveSum { sum: 1.0 }).unwrap();
        assert!(array.set_value(&MutableValue::FloatArray(vec![0.25, 0.75])).is_ok());
        assert!(array.set_value(&MutableValue::FloatArray(vec![0.5, 0.6])).is_err());
        assert!(array.set_value(&MutableValue::FloatArray(vec![0.0, 1.0])).is_err());
        assert!(array.set_value(&MutableValue::FloatArray(vec![1.0])).is_err());
    }

    #[test]
    fn test_even_split_for_int_positive_sum() {
        let value = MutableIntArray::new(3, ArrayConstraint::PositiveSum { sum: 10 }).unwrap();
        assert_eq!(value.value(), &[4, 3, 3]);
    }

    proptest! {
        #[test]
        fn prop_float_range_draws_in_bounds(min in -1e6f64..1e6, width in 0f64..1e6, seed in any::<u64>()) {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut value = DecisionMutableValue::float(min, min + width).unwrap();
            for _ in 0..50 {
                value.set_value_random(&mut rng);
                prop_assert!(value.is_valid());
            }
        }

        #[test]
        fn prop_positive_sum_draws_close(len in 1usize..16, sum in 1e-3f64..1e6, seed in any::<u64>()) {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut value =
                DecisionMutableValue::float_array(len, ArrayConstraint::PositiveSum { sum }).unwrap();
            for _ in 0..50 {
                value.set_value_random(&mut rng);
                prop_assert!(value.is_valid());
            }
        }
    }
}
