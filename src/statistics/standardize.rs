use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

/// How a signal column is standardized before it enters an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Standardization {
    /// Zero mean and unit L2 norm per column
    Global,
    /// Zero mean per column, magnitude preserved for the local variance estimate
    Local,
}

#[derive(Debug, Clone)]
pub struct Standardized {
    pub values: Array2<f64>,
    /// Columns with zero variance. In global mode they are left as all-zero columns.
    pub degenerate: Vec<usize>,
}

impl Standardized {
    pub fn is_clean(&self) -> bool {
        self.degenerate.is_empty()
    }
}

/// True when every entry equals the first one, or the column is empty.
fn is_constant(col: ArrayView1<f64>) -> bool {
    match col.first() {
        Some(&first) => col.iter().all(|&v| v == first),
        None => true,
    }
}

/// Standardizes each column of a spots × k matrix.
///
/// A column is degenerate when its raw values are all equal, or when centering leaves
/// no finite positive spread. The check runs on the raw values, so it does not depend
/// on the column's magnitude.
pub fn standardize(x: ArrayView2<f64>, mode: Standardization) -> Standardized {
    let mut values = x.to_owned();
    let mut degenerate = Vec::new();

    for (j, mut col) in values.axis_iter_mut(Axis(1)).enumerate() {
        if is_constant(col.view()) {
            degenerate.push(j);
            col.fill(0.0);
            continue;
        }

        let mean = col.mean().unwrap_or(0.0);
        col -= mean;
        let ss: f64 = col.iter().map(|v| v * v).sum();

        if !(ss > 0.0 && ss.is_finite()) {
            degenerate.push(j);
            col.fill(0.0);
            continue;
        }
        if mode == Standardization::Global {
            col /= ss.sqrt();
        }
    }

    Standardized { values, degenerate }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_global_mean_zero_unit_norm() {
        let x = array![[1.0, 0.0], [2.0, 5.0], [4.0, 1.0], [9.0, 0.5]];
        let out = standardize(x.view(), Standardization::Global);
        assert!(out.is_clean());

        for col in out.values.columns() {
            assert_abs_diff_eq!(col.sum(), 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(col.dot(&col), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_local_centers_only() {
        let x = array![[1.0, 10.0], [3.0, 30.0], [5.0, 20.0]];
        let out = standardize(x.view(), Standardization::Local);

        assert_eq!(out.values, array![[-2.0, -10.0], [0.0, 10.0], [2.0, 0.0]]);
        let var_small = out.values.column(0).var(0.0);
        let var_large = out.values.column(1).var(0.0);
        assert!(var_small < var_large);
        assert_abs_diff_eq!(var_small, x.column(0).var(0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_constant_column_is_flagged() {
        let x = array![[2.0, 1.0], [2.0, 0.0], [2.0, 3.0]];
        for mode in [Standardization::Global, Standardization::Local] {
            let out = standardize(x.view(), mode);
            assert_eq!(out.degenerate, vec![0]);
            assert!(out.values.column(0).iter().all(|&v| v == 0.0));
            assert!(out.values.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_constant_column_of_any_magnitude_is_flagged() {
        for (value, n) in [(7.3, 4000), (123.456, 1000), (98765.4321, 3), (0.1, 10_000)] {
            let x = Array2::from_elem((n, 1), value);
            for mode in [Standardization::Global, Standardization::Local] {
                let out = standardize(x.view(), mode);
                assert_eq!(out.degenerate, vec![0], "{} x {}", value, n);
                assert!(out.values.iter().all(|&v| v == 0.0));
            }
        }
    }

    #[test]
    fn test_tiny_varying_column_is_kept() {
        let x = Array2::from_shape_fn((500, 1), |(i, _)| 1e-13 * (i % 5) as f64);
        let out = standardize(x.view(), Standardization::Global);
        assert!(out.is_clean());
        let col = out.values.column(0);
        assert_abs_diff_eq!(col.dot(&col), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(col.sum(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_empty_column_is_degenerate() {
        let x = Array2::<f64>::zeros((0, 2));
        let out = standardize(x.view(), Standardization::Local);
        assert_eq!(out.degenerate, vec![0, 1]);
    }
}
