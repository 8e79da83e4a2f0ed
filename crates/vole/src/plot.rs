use std::path::Path;
use std::sync::Arc;

use plotters::prelude::*;

use vole_backend::{compile, CompileOptions, Runtime};
use vole_core::{DType, Error, Graph, Node, Result};

// Univariate plot sampling
//
// Sampling goes through the full compile/execute path: the x grid is built
// as an iota inside the graph, the function under inspection is applied to
// it symbolically, and both the grid and the values come back as executable
// outputs. Rendering is a separate step so several sampled curves can share
// one chart.

/// Number of sample points per curve.
pub const NUM_POINTS: usize = 1000;

/// Sampled x range, slightly wider than the unit interval so behavior at
/// and just outside the endpoints is visible.
pub const X_MIN: f64 = -0.1;
pub const X_MAX: f64 = 1.1;

/// One sampled curve: paired x and y values.
#[derive(Debug, Clone)]
pub struct Curve {
    pub name: String,
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
}

/// Sample `f` over [`X_MIN`], [`X_MAX`] at [`NUM_POINTS`] evenly spaced
/// points, through `runtime`. The executable is finalized before returning.
pub fn sample<F>(runtime: Arc<dyn Runtime>, name: &str, f: F) -> Result<Curve>
where
    F: FnOnce(&Node) -> Result<Node>,
{
    let graph = Graph::new(name);
    let step = (X_MAX - X_MIN) / (NUM_POINTS - 1) as f64;
    let xs = graph
        .iota(NUM_POINTS, DType::F64, 0)?
        .affine(step, X_MIN)?;
    let ys = f(&xs)?;
    let mut exe = compile(runtime, &[xs, ys], &CompileOptions::default())?;
    let mut outputs = exe.execute(Vec::new(), &[])?;
    exe.finalize();
    let (xs, ys) = match (outputs.pop(), outputs.pop()) {
        (Some(y), Some(x)) => (x.to_f64_vec(), y.to_f64_vec()),
        _ => {
            return Err(Error::msg(
                "runtime returned fewer outputs than were compiled",
            ))
        }
    };
    Ok(Curve {
        name: name.to_string(),
        xs,
        ys,
    })
}

/// Render `curves` overlaid on one SVG line chart at `path`. Single curves
/// get a thicker stroke; with several curves a thin stroke keeps overlaps
/// readable.
pub fn render(path: impl AsRef<Path>, title: &str, curves: &[Curve]) -> Result<()> {
    if curves.is_empty() {
        return Err(Error::Configuration(
            "nothing to plot: no curves given".to_string(),
        ));
    }
    let (y_min, y_max) = y_range(curves);
    let stroke = if curves.len() > 1 { 1 } else { 2 };

    let root = SVGBackend::new(path.as_ref(), (800, 600)).into_drawing_area();
    let draw = || -> std::result::Result<(), Box<dyn std::error::Error>> {
        root.fill(&WHITE)?;
        let mut chart = ChartBuilder::on(&root)
            .caption(title, ("sans-serif", 24))
            .margin(10)
            .x_label_area_size(30)
            .y_label_area_size(45)
            .build_cartesian_2d(X_MIN..X_MAX, y_min..y_max)?;
        chart.configure_mesh().draw()?;
        for (idx, curve) in curves.iter().enumerate() {
            let color = Palette99::pick(idx).to_rgba();
            let series = curve
                .xs
                .iter()
                .zip(curve.ys.iter())
                .map(|(&x, &y)| (x, y));
            chart
                .draw_series(LineSeries::new(series, color.stroke_width(stroke)))?
                .label(curve.name.clone())
                .legend(move |(x, y)| {
                    PathElement::new(vec![(x, y), (x + 18, y)], color.stroke_width(stroke))
                });
        }
        chart
            .configure_series_labels()
            .border_style(&BLACK)
            .background_style(&WHITE.mix(0.8))
            .draw()?;
        root.present()?;
        Ok(())
    };
    draw().map_err(|err| Error::msg(format!("failed to render chart {:?}: {}", title, err)))
}

/// The y span covered by the curves' finite values, padded for readability.
fn y_range(curves: &[Curve]) -> (f64, f64) {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for curve in curves {
        for &y in &curve.ys {
            if y.is_finite() {
                lo = lo.min(y);
                hi = hi.max(y);
            }
        }
    }
    if !lo.is_finite() || !hi.is_finite() {
        return (-1.0, 1.0);
    }
    let pad = ((hi - lo) * 0.05).max(1e-3);
    (lo - pad, hi + pad)
}
