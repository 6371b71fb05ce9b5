//! Non-interactive chart rendering.
//!
//! [`SvgRenderer`] draws a [`ChartSpec`] as a standalone SVG document under the
//! plot root. Each chart gets a fresh v4 UUID file name and is written through
//! a temporary file and a rename, so concurrent requests never collide and a
//! reader never sees a half-written image.

use quick_xml::escape::escape;
use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::debug;

use crate::config::PathsConfig;
use crate::error::{AnalysisError, Result};
use crate::models::{ChartKind, ChartSpec};

/// Capability to turn a chart description into a served artifact URL.
pub trait ChartRenderer: Send + Sync {
    fn render(&self, spec: &ChartSpec) -> Result<String>;
}

const WIDTH: f64 = 640.0;
const HEIGHT: f64 = 400.0;
const MARGIN: f64 = 60.0;
const PALETTE: &[&str] = &[
    "#4e79a7", "#f28e2b", "#e15759", "#76b7b2", "#59a14f", "#edc948", "#b07aa1", "#ff9da7",
    "#9c755f", "#bab0ac",
];

pub struct SvgRenderer {
    plot_root: PathBuf,
    url_prefix: String,
}

impl SvgRenderer {
    pub fn new(paths: &PathsConfig) -> Self {
        Self {
            plot_root: paths.plot_root.clone(),
            url_prefix: paths.plot_url_prefix.trim_end_matches('/').to_string(),
        }
    }
}

impl ChartRenderer for SvgRenderer {
    fn render(&self, spec: &ChartSpec) -> Result<String> {
        if spec.series.iter().all(|s| s.values.is_empty()) {
            return Err(AnalysisError::format(format!(
                "chart '{}' has no data",
                spec.title
            )));
        }
        let svg = to_svg(spec);

        std::fs::create_dir_all(&self.plot_root)?;
        let name = format!("{}.svg", uuid::Uuid::new_v4());
        let tmp = self.plot_root.join(format!(".{}.tmp", name));
        let target = self.plot_root.join(&name);
        std::fs::write(&tmp, svg)?;
        if let Err(e) = std::fs::rename(&tmp, &target) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }

        debug!(chart = %spec.title, kind = spec.kind.as_str(), file = %target.display(), "chart rendered");
        Ok(format!("{}/{}", self.url_prefix, name))
    }
}

/// Renders a chart description as an SVG document.
pub fn to_svg(spec: &ChartSpec) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" font-family="sans-serif" font-size="11">"#,
        w = WIDTH,
        h = HEIGHT
    );
    out.push_str(r##"<rect width="100%" height="100%" fill="#ffffff"/>"##);
    let _ = write!(
        out,
        r#"<text x="{}" y="24" text-anchor="middle" font-size="16">{}</text>"#,
        WIDTH / 2.0,
        escape(spec.title.as_str())
    );

    match spec.kind {
        ChartKind::Bar => draw_bars(&mut out, spec),
        ChartKind::Pie => draw_pie(&mut out, spec),
        ChartKind::Line => draw_lines(&mut out, spec),
    }

    if spec.kind != ChartKind::Pie {
        draw_axis_labels(&mut out, spec);
    }
    out.push_str("</svg>\n");
    out
}

fn value_range(spec: &ChartSpec) -> (f64, f64) {
    let values = spec.series.iter().flat_map(|s| s.values.iter().copied());
    let (lo, hi) = values.fold((0.0f64, 0.0f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if (hi - lo).abs() < f64::EPSILON {
        (lo, lo + 1.0)
    } else {
        (lo, hi)
    }
}

fn plot_y(v: f64, lo: f64, hi: f64) -> f64 {
    let inner = HEIGHT - 2.0 * MARGIN;
    HEIGHT - MARGIN - (v - lo) / (hi - lo) * inner
}

fn draw_axes(out: &mut String) {
    let _ = write!(
        out,
        r##"<line x1="{m}" y1="{b}" x2="{r}" y2="{b}" stroke="#333"/><line x1="{m}" y1="{m}" x2="{m}" y2="{b}" stroke="#333"/>"##,
        m = MARGIN,
        b = HEIGHT - MARGIN,
        r = WIDTH - MARGIN
    );
}

fn draw_bars(out: &mut String, spec: &ChartSpec) {
    draw_axes(out);
    let (lo, hi) = value_range(spec);
    let groups = spec.labels.len().max(1);
    let per_group = spec.series.len().max(1);
    let slot = (WIDTH - 2.0 * MARGIN) / groups as f64;
    let bar_w = slot * 0.8 / per_group as f64;
    let zero = plot_y(0.0, lo, hi);

    for (si, series) in spec.series.iter().enumerate() {
        let color = PALETTE[si % PALETTE.len()];
        for (i, v) in series.values.iter().enumerate() {
            let x = MARGIN + slot * i as f64 + slot * 0.1 + bar_w * si as f64;
            let y = plot_y(*v, lo, hi);
            let _ = write!(
                out,
                r#"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}"/>"#,
                x,
                y.min(zero),
                bar_w,
                (zero - y).abs(),
                color
            );
        }
    }
    for (i, label) in spec.labels.iter().enumerate() {
        let x = MARGIN + slot * (i as f64 + 0.5);
        let _ = write!(
            out,
            r#"<text x="{:.1}" y="{:.1}" text-anchor="end" transform="rotate(-40 {:.1} {:.1})">{}</text>"#,
            x,
            HEIGHT - MARGIN + 14.0,
            x,
            HEIGHT - MARGIN + 14.0,
            escape(label.as_str())
        );
    }
}

fn draw_pie(out: &mut String, spec: &ChartSpec) {
    let Some(series) = spec.series.first() else {
        return;
    };
    let total: f64 = series.values.iter().filter(|v| **v > 0.0).sum();
    if total <= 0.0 {
        return;
    }
    let (cx, cy, r) = (WIDTH / 2.0 - 80.0, HEIGHT / 2.0 + 10.0, 140.0);
    let mut angle = -std::f64::consts::FRAC_PI_2;

    for (i, v) in series.values.iter().enumerate() {
        if *v <= 0.0 {
            continue;
        }
        let color = PALETTE[i % PALETTE.len()];
        let sweep = v / total * std::f64::consts::TAU;
        if (sweep - std::f64::consts::TAU).abs() < 1e-9 {
            let _ = write!(
                out,
                r#"<circle cx="{:.1}" cy="{:.1}" r="{:.1}" fill="{}"/>"#,
                cx, cy, r, color
            );
        } else {
            let (x1, y1) = (cx + r * angle.cos(), cy + r * angle.sin());
            let end = angle + sweep;
            let (x2, y2) = (cx + r * end.cos(), cy + r * end.sin());
            let large = if sweep > std::f64::consts::PI { 1 } else { 0 };
            let _ = write!(
                out,
                r#"<path d="M{:.1},{:.1} L{:.1},{:.1} A{:.1},{:.1} 0 {} 1 {:.1},{:.1} Z" fill="{}"/>"#,
                cx, cy, x1, y1, r, r, large, x2, y2, color
            );
        }
        angle += sweep;

        let label = spec.labels.get(i).map(String::as_str).unwrap_or("");
        let ly = 60.0 + 18.0 * i as f64;
        let _ = write!(
            out,
            r#"<rect x="{:.1}" y="{:.1}" width="10" height="10" fill="{}"/><text x="{:.1}" y="{:.1}">{} ({:.1}%)</text>"#,
            WIDTH - 190.0,
            ly - 9.0,
            color,
            WIDTH - 175.0,
            ly,
            escape(label),
            v / total * 100.0
        );
    }
}

fn draw_lines(out: &mut String, spec: &ChartSpec) {
    draw_axes(out);
    let (lo, hi) = value_range(spec);
    let points = spec
        .series
        .iter()
        .map(|s| s.values.len())
        .max()
        .unwrap_or(0);
    let step = (WIDTH - 2.0 * MARGIN) / (points.max(2) - 1) as f64;

    for (si, series) in spec.series.iter().enumerate() {
        let color = PALETTE[si % PALETTE.len()];
        let coords: Vec<String> = series
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| format!("{:.1},{:.1}", MARGIN + step * i as f64, plot_y(*v, lo, hi)))
            .collect();
        let _ = write!(
            out,
            r#"<polyline points="{}" fill="none" stroke="{}" stroke-width="2"/>"#,
            coords.join(" "),
            color
        );
        let _ = write!(
            out,
            r#"<text x="{:.1}" y="{:.1}" fill="{}">{}</text>"#,
            WIDTH - MARGIN + 4.0,
            MARGIN + 14.0 * si as f64,
            color,
            escape(series.name.as_str())
        );
    }
}

fn draw_axis_labels(out: &mut String, spec: &ChartSpec) {
    if let Some(x) = &spec.x_label {
        let _ = write!(
            out,
            r#"<text x="{}" y="{}" text-anchor="middle">{}</text>"#,
            WIDTH / 2.0,
            HEIGHT - 8.0,
            escape(x.as_str())
        );
    }
    if let Some(y) = &spec.y_label {
        let _ = write!(
            out,
            r#"<text x="16" y="{}" text-anchor="middle" transform="rotate(-90 16 {})">{}</text>"#,
            HEIGHT / 2.0,
            HEIGHT / 2.0,
            escape(y.as_str())
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Series;

    fn spec(kind: ChartKind) -> ChartSpec {
        ChartSpec {
            kind,
            title: "revenue by <region>".into(),
            labels: vec!["north".into(), "south".into()],
            series: vec![Series {
                name: "revenue".into(),
                values: vec![3.0, 1.0],
            }],
            x_label: Some("region".into()),
            y_label: Some("revenue".into()),
            data_ref: None,
        }
    }

    fn renderer(dir: &std::path::Path) -> SvgRenderer {
        SvgRenderer::new(&PathsConfig {
            upload_root: dir.join("u"),
            plot_root: dir.join("plots"),
            index_root: dir.join("i"),
            plot_url_prefix: "/static/plots/".into(),
        })
    }

    #[test]
    fn svg_escapes_text_and_draws_each_kind() {
        let bar = to_svg(&spec(ChartKind::Bar));
        assert!(bar.contains("revenue by &lt;region&gt;"));
        assert_eq!(bar.matches("<rect x=").count(), 2);
        assert!(to_svg(&spec(ChartKind::Pie)).contains("<path"));
        assert!(to_svg(&spec(ChartKind::Line)).contains("<polyline"));
    }

    #[test]
    fn renders_to_unique_files_under_plot_root() {
        let dir = tempfile::tempdir().unwrap();
        let r = renderer(dir.path());
        let a = r.render(&spec(ChartKind::Bar)).unwrap();
        let b = r.render(&spec(ChartKind::Bar)).unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("/static/plots/") && a.ends_with(".svg"));

        let name = a.rsplit('/').next().unwrap();
        let written = std::fs::read_to_string(dir.path().join("plots").join(name)).unwrap();
        assert!(written.starts_with("<svg"));
        let leftovers = std::fs::read_dir(dir.path().join("plots"))
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .map(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn empty_chart_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = spec(ChartKind::Line);
        s.series[0].values.clear();
        assert!(renderer(dir.path()).render(&s).is_err());
    }
}
