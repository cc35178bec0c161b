use std::f64::consts::SQRT_2;

/// z statistic for `b` over `a` with a pooled proportion; 0 when the pooled variance is 0.
pub fn two_proportion_z(a_success: u64, a_total: u64, b_success: u64, b_total: u64) -> f64 {
    if a_total == 0 || b_total == 0 {
        return 0.0;
    }
    let (n1, n2) = (a_total as f64, b_total as f64);
    let p1 = a_success as f64 / n1;
    let p2 = b_success as f64 / n2;
    let pooled = (a_success + b_success) as f64 / (n1 + n2);
    let se = (pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2)).sqrt();
    if se == 0.0 {
        return 0.0;
    }
    (p2 - p1) / se
}

pub fn two_sided_p_value(z: f64) -> f64 {
    (2.0 * (1.0 - normal_cdf(z.abs()))).clamp(0.0, 1.0)
}

pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / SQRT_2))
}

// Abramowitz & Stegun 7.1.26, max abs error 1.5e-7.
fn erf(x: f64) -> f64 {
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t * (-x * x).exp();
    sign * y
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_cdf_reference_points() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((normal_cdf(1.959964) - 0.975).abs() < 1e-4);
        assert!((normal_cdf(-1.959964) - 0.025).abs() < 1e-4);
    }

    #[test]
    fn test_equal_proportions_give_zero_z() {
        assert_eq!(two_proportion_z(50, 100, 50, 100), 0.0);
        assert!((two_sided_p_value(0.0) - 1.0).abs() < 1e-7);
    }

    #[test]
    fn test_degenerate_inputs_do_not_produce_nan() {
        assert_eq!(two_proportion_z(0, 0, 5, 10), 0.0);
        assert_eq!(two_proportion_z(10, 10, 10, 10), 0.0);
    }

    #[test]
    fn test_direction_of_z() {
        assert!(two_proportion_z(30, 100, 70, 100) > 0.0);
        assert!(two_proportion_z(70, 100, 30, 100) < 0.0);
    }
}
