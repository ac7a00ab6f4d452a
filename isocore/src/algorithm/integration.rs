use serde::{Deserialize, Serialize};

/// Number of points taken from each end of the windowed trace for the baseline fit.
pub const BASELINE_EDGE_POINTS: usize = 3;

/// Which time points count as inside an integration window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryPolicy {
    /// `left < t < right`, the historical behaviour.
    #[default]
    Strict,
    /// `left <= t <= right`
    Inclusive,
}

impl BoundaryPolicy {
    pub fn contains(&self, t: f64, window: &IntegrationWindow) -> bool {
        match self {
            BoundaryPolicy::Strict => t > window.left && t < window.right,
            BoundaryPolicy::Inclusive => t >= window.left && t <= window.right,
        }
    }
}

/// How the trapezoidal rule treats the abscissa.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrationMethod {
    /// Trapezoid over the real time axis.
    #[default]
    #[serde(rename = "time")]
    TimeBased,
    /// Trapezoid with unit spacing between consecutive points, ignoring time.
    #[serde(rename = "unit")]
    UnitSpacing,
}

/// Integration bounds in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntegrationWindow {
    pub left: f64,
    pub right: f64,
}

impl IntegrationWindow {
    pub fn new(left: f64, right: f64) -> Self {
        IntegrationWindow { left, right }
    }

    /// Window `[rt - loffset, rt + roffset]`.
    pub fn around(retention_time: f64, loffset: f64, roffset: f64) -> Self {
        IntegrationWindow {
            left: retention_time - loffset,
            right: retention_time + roffset,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrationOptions {
    pub policy: BoundaryPolicy,
    pub method: IntegrationMethod,
    pub baseline_correction: bool,
}

impl IntegrationOptions {
    pub fn new(policy: BoundaryPolicy, method: IntegrationMethod, baseline_correction: bool) -> Self {
        IntegrationOptions {
            policy,
            method,
            baseline_correction,
        }
    }
}

/// trapezoidal integral of `y`
///
/// Arguments:
///
/// * `time` - abscissa, must have the same length as `y`
/// * `y` - values to integrate
/// * `method` - use the time axis or unit spacing
///
/// Returns:
///
/// * `f64` - area, `0.0` for fewer than two points
///
/// # Examples
///
/// ```
/// use isocore::algorithm::integration::{trapezoid, IntegrationMethod};
///
/// let time = vec![0.0, 0.5, 1.0];
/// let y = vec![2.0, 2.0, 2.0];
/// assert_eq!(trapezoid(&time, &y, IntegrationMethod::TimeBased), 2.0);
/// assert_eq!(trapezoid(&time, &y, IntegrationMethod::UnitSpacing), 4.0);
/// ```
pub fn trapezoid(time: &[f64], y: &[f64], method: IntegrationMethod) -> f64 {
    if y.len() < 2 {
        return 0.0;
    }

    match method {
        IntegrationMethod::TimeBased => time
            .windows(2)
            .zip(y.windows(2))
            .map(|(t, v)| (t[1] - t[0]) * (v[0] + v[1]) / 2.0)
            .sum(),
        IntegrationMethod::UnitSpacing => y.windows(2).map(|v| (v[0] + v[1]) / 2.0).sum(),
    }
}

/// least squares line through the first and last `BASELINE_EDGE_POINTS` points, evaluated at
/// every time point
///
/// Returns `None` when there are fewer than `2 * BASELINE_EDGE_POINTS` points.
pub fn linear_baseline(time: &[f64], intensity: &[f64]) -> Option<Vec<f64>> {
    let n = time.len().min(intensity.len());
    if n < 2 * BASELINE_EDGE_POINTS {
        return None;
    }

    let edges: Vec<usize> = (0..BASELINE_EDGE_POINTS).chain(n - BASELINE_EDGE_POINTS..n).collect();
    let k = edges.len() as f64;
    let mean_x = edges.iter().map(|&i| time[i]).sum::<f64>() / k;
    let mean_y = edges.iter().map(|&i| intensity[i]).sum::<f64>() / k;

    let (sxy, sxx) = edges.iter().fold((0.0, 0.0), |(sxy, sxx), &i| {
        let dx = time[i] - mean_x;
        (sxy + dx * (intensity[i] - mean_y), sxx + dx * dx)
    });
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    let intercept = mean_y - slope * mean_x;

    Some(time[..n].iter().map(|t| slope * t + intercept).collect())
}

/// area under the linear baseline, `None` if no baseline can be fitted
pub fn baseline_area(time: &[f64], intensity: &[f64], method: IntegrationMethod) -> Option<f64> {
    linear_baseline(time, intensity).map(|baseline| trapezoid(time, &baseline, method))
}

/// integrate a single trace inside a window
pub fn integrate_trace(
    time: &[f64],
    intensity: &[f64],
    window: &IntegrationWindow,
    options: &IntegrationOptions,
) -> f64 {
    let indices: Vec<usize> = (0..time.len().min(intensity.len()))
        .filter(|&i| options.policy.contains(time[i], window))
        .collect();
    let t: Vec<f64> = indices.iter().map(|&i| time[i]).collect();
    let y: Vec<f64> = indices.iter().map(|&i| intensity[i]).collect();
    area_with_baseline(&t, &y, options)
}

fn area_with_baseline(time: &[f64], intensity: &[f64], options: &IntegrationOptions) -> f64 {
    let area = trapezoid(time, intensity, options.method);
    if !options.baseline_correction {
        return area;
    }
    match baseline_area(time, intensity, options.method) {
        Some(baseline) => area - baseline,
        None => area,
    }
}

/// per-isotopologue peak areas of a flattened EIC
///
/// Arguments:
///
/// * `time` - time axis in minutes
/// * `intensity` - intensities in isotopologue-major order
/// * `label_atoms` - number of labelled positions, the trace holds `label_atoms + 1` isotopologues
/// * `window` - integration bounds
/// * `options` - boundary policy, integration method and baseline switch
///
/// Returns:
///
/// * `Vec<f64>` - one area per isotopologue; all zeros if the intensities cannot be reshaped
///   or no point falls inside the window
///
/// # Examples
///
/// ```
/// use isocore::algorithm::integration::{peak_areas, IntegrationOptions, IntegrationWindow};
///
/// let time = vec![0.9, 1.0, 1.1, 1.2];
/// let intensity = vec![1.0, 4.0, 4.0, 1.0, 0.0, 2.0, 2.0, 0.0];
/// let areas = peak_areas(&time, &intensity, 1, &IntegrationWindow::new(0.95, 1.15), &IntegrationOptions::default());
/// assert!((areas[0] - 0.4).abs() < 1e-12);
/// assert!((areas[1] - 0.2).abs() < 1e-12);
/// ```
pub fn peak_areas(
    time: &[f64],
    intensity: &[f64],
    label_atoms: u32,
    window: &IntegrationWindow,
    options: &IntegrationOptions,
) -> Vec<f64> {
    let n_isotopologues = label_atoms as usize + 1;
    let n_points = time.len();

    if intensity.len() != n_isotopologues * n_points {
        log::warn!(
            "cannot reshape {} intensities into {} isotopologues x {} time points, areas set to zero",
            intensity.len(),
            n_isotopologues,
            n_points
        );
        return vec![0.0; n_isotopologues];
    }

    let indices: Vec<usize> = (0..n_points)
        .filter(|&i| options.policy.contains(time[i], window))
        .collect();
    if indices.is_empty() {
        log::debug!("no time points within [{}, {}]", window.left, window.right);
        return vec![0.0; n_isotopologues];
    }

    let windowed_time: Vec<f64> = indices.iter().map(|&i| time[i]).collect();

    intensity
        .chunks(n_points)
        .map(|trace| {
            let windowed: Vec<f64> = indices.iter().map(|&i| trace[i]).collect();
            area_with_baseline(&windowed_time, &windowed, options)
        })
        .collect()
}
