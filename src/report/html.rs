//! HTML report with chart gallery and side-by-side visual diffs

use super::{escape, ChartImage, MetricGroup, ReportModel, ReportRow};
use crate::metrics::MetricValue;
use std::io::{self, Write};
use thiserror::Error;

/// A row the template could not be filled for
#[derive(Debug, Error, PartialEq)]
pub enum RowRenderError {
    #[error("no value for {0}")]
    MissingMetric(String),

    #[error("non-numeric value {value:?} for {metric}")]
    NotNumeric { metric: String, value: String },

    #[error("no image path")]
    MissingImage,
}

/// Short explanation shown for metrics we know about
pub fn metric_description(name: &str) -> Option<&'static str> {
    match name {
        "MAE" => Some("Mean Absolute Error. Average per-pixel difference; lower is better."),
        "RMSE" => Some("Root Mean Squared Error. Penalises large deviations more than MAE; lower is better."),
        "PSNR" => Some("Peak Signal-to-Noise Ratio in dB; higher is better. Identical images report 999."),
        "SSIM" => Some("Structural Similarity. Compares local structure, luminance and contrast; 1.0 is identical."),
        "NCC" => Some("Normalized Cross Correlation. Linear similarity of pixel values; 1.0 is identical."),
        "AE" => Some("Absolute Error. Count of pixels that differ beyond the fuzz threshold."),
        "DSSIM" => Some("Structural dissimilarity, derived from SSIM; 0 is identical."),
        _ => None,
    }
}

/// Numbers below 10 need more digits to be useful (SSIM, NCC).
pub fn format_metric(value: f64) -> String {
    if value.abs() < 10.0 {
        format!("{:.4}", value)
    } else {
        format!("{:.2}", value)
    }
}

/// Fill the comparison-row template for one row.
pub fn render_row(row: &ReportRow, groups: &[MetricGroup]) -> Result<String, RowRenderError> {
    if row.image_src.is_empty() {
        return Err(RowRenderError::MissingImage);
    }

    let mut metrics = String::new();
    for group in groups {
        let column = group.headline_column();
        let value = match row.metrics.get(column) {
            Some(MetricValue::Number(v)) => *v,
            Some(MetricValue::Text(t)) => {
                return Err(RowRenderError::NotNumeric {
                    metric: column.to_string(),
                    value: t.clone(),
                })
            }
            None => return Err(RowRenderError::MissingMetric(column.to_string())),
        };
        metrics.push_str(&format!(
            "<strong>{}:</strong> {} ",
            escape(column),
            format_metric(value)
        ));
    }

    let setting = if row.lossless {
        "Lossless".to_string()
    } else {
        format!("Q{}", row.quality)
    };

    let diff = if row.diff_src.is_empty() {
        r#"<div class="no-diff">Difference image unavailable</div>"#.to_string()
    } else {
        format!(
            r#"<img src="{}" class="lb-trigger-img" data-type="diff" data-row="{}" loading="lazy" title="Click to inspect">"#,
            escape(&row.diff_src),
            row.index
        )
    };

    Ok(format!(
        r#"
        <div class="comparison-row" data-index="{index}">
            <div class="img-card">
                <div class="meta">
                    <span class="badge badge-{format}">{format}</span>
                    <strong>{filename}</strong><br>
                    Settings: {setting} ({params}) | Size: {size:.2} KB<br>
                    Details: {details}
                </div>
                <img src="{img_src}" class="lb-trigger-img" data-type="img" data-row="{index}" loading="lazy" title="Click to inspect">
            </div>
            <div class="img-card">
                <div class="meta">
                    <strong>Difference Analysis</strong><br>
                    {metrics}
                </div>
                {diff}
            </div>
        </div>
"#,
        index = row.index,
        format = escape(&row.format),
        filename = escape(&row.filename),
        setting = setting,
        params = escape(&row.params),
        size = row.size_kb,
        details = escape(&row.details_label),
        img_src = escape(&row.image_src),
        metrics = metrics,
        diff = diff,
    ))
}

/// Visible marker standing in for a row that failed to render
pub fn render_row_error(row: &ReportRow, err: &RowRenderError) -> String {
    format!(
        r#"
        <div class="comparison-row row-error" data-index="{}">
            <div class="meta">Could not render <strong>{}</strong>: {}</div>
        </div>
"#,
        row.index,
        escape(&row.filename),
        escape(&err.to_string())
    )
}

fn summary_html(model: &ReportModel) -> String {
    let s = &model.summary;
    let mut html = format!(
        r#"<div class="summary-box">
            <h3>Report Summary</h3>
            <p><strong>Input Image:</strong> {}</p>
            <p><strong>Total Variants:</strong> {}</p>
            <p><strong>Formats Tested:</strong> {}</p>
            <p><strong>Metrics Captured:</strong> {}</p>
            <p><strong>Generated:</strong> {}</p>"#,
        escape(&s.input_name),
        s.total,
        escape(&s.formats.join(", ")),
        escape(&s.metrics.join(", ")),
        escape(&model.generated)
    );
    if s.missing_diffs > 0 {
        html.push_str(&format!(
            "\n            <p><strong>Missing Difference Images:</strong> {}</p>",
            s.missing_diffs
        ));
    }
    html.push_str("\n        </div>");
    html
}

fn legend_html(groups: &[MetricGroup]) -> String {
    let mut html = String::new();
    for group in groups {
        let description = metric_description(&group.name).unwrap_or("Custom metric reported by the comparison tool.");
        html.push_str(&format!(
            r#"
            <div class="metric-card">
                <h4>{}</h4>
                <p>{}</p>
                <p class="columns">Columns: {}</p>
            </div>"#,
            escape(&group.name),
            description,
            escape(&group.columns.join(", "))
        ));
    }
    html
}

fn graphs_html(charts: &[ChartImage]) -> String {
    let mut html = String::new();
    for chart in charts {
        let dark = chart
            .dark_src
            .as_ref()
            .map(|d| format!(r#" data-dark-src="{}""#, escape(d)))
            .unwrap_or_default();
        html.push_str(&format!(
            r#"
            <div class="graph-box"><h3>{title}</h3><img src="{src}"{dark} data-caption="{title}" alt="{title}"></div>"#,
            title = escape(&chart.title),
            src = escape(&chart.src),
            dark = dark
        ));
    }
    html
}

pub fn write<W: Write>(writer: &mut W, model: &ReportModel, charts: &[ChartImage]) -> io::Result<()> {
    write!(
        writer,
        r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Compression Analysis Report - {title}</title>
    <style>{style}</style>
</head>
<body>
    <nav class="navbar">
        <a href="#top">Top</a>
        <a href="#summary">Summary</a>
        <a href="#metrics-info">Metrics</a>
        <a href="#graphs">Graphs</a>
        <a href="#comparisons">Comparisons</a>
    </nav>

    <div class="container" id="top">
        <h1>Image Compression Analysis</h1>

        <div id="summary">
        {summary}
        </div>

        <h2 id="metrics-info">Metric Definitions</h2>
        <div class="metric-explanations">{legend}
        </div>

        <h2 id="graphs">Performance Visualization</h2>
        <div class="metrics-grid">{graphs}
        </div>

        <h2 id="comparisons">Visual Inspection</h2>
"##,
        title = escape(&model.summary.input_name),
        style = STYLE,
        summary = summary_html(model),
        legend = legend_html(&model.groups),
        graphs = graphs_html(charts),
    )?;

    for row in &model.rows {
        let html = match render_row(row, &model.groups) {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!("row {} rendered with error: {}", row.filename, e);
                render_row_error(row, &e)
            }
        };
        writer.write_all(html.as_bytes())?;
    }

    write!(
        writer,
        r#"    </div>

    <div id="lb-charts" class="lightbox">
        <span class="lightbox-close" onclick="closeLb('charts')">&times;</span>
        <img class="lightbox-content" id="lb-charts-img">
        <div class="lightbox-caption" id="lb-charts-caption"></div>
        <a class="lightbox-nav prev" onclick="navCharts(-1)">&#10094;</a>
        <a class="lightbox-nav next" onclick="navCharts(1)">&#10095;</a>
    </div>

    <div id="lb-imgs" class="lightbox">
        <span class="lightbox-close" onclick="closeLb('imgs')">&times;</span>
        <img class="lightbox-content" id="lb-imgs-img">
        <a class="lightbox-nav prev" onclick="navImgs(-1, 0)" title="Previous Row (Left)">&#10094;</a>
        <a class="lightbox-nav next" onclick="navImgs(1, 0)" title="Next Row (Right)">&#10095;</a>
        <a class="lightbox-nav up" onclick="navImgs(0, -1)" title="Toggle View (Up)">&#9650; Image/Diff</a>
        <a class="lightbox-nav down" onclick="navImgs(0, 1)" title="Toggle View (Down)">&#9660; Image/Diff</a>
        <div class="lightbox-caption" id="lb-imgs-caption"></div>
    </div>

    <script>{script}</script>
</body>
</html>
"#,
        script = SCRIPT
    )
}

const STYLE: &str = r#"
        :root {
            --bg-body: #f5f5f5;
            --bg-container: #ffffff;
            --text-main: #1a202c;
            --text-muted: #4a5568;
            --border-color: #e2e8f0;
            --nav-bg: #2d3748;
            --nav-text: #e2e8f0;
            --summary-bg: #ebf8ff;
            --summary-border: #4299e1;
            --card-bg: #f7fafc;
            --card-border: #e2e8f0;
            --meta-bg: #f7fafc;
            --meta-border: #cbd5e0;
            --error: #e53e3e;
        }
        @media (prefers-color-scheme: dark) {
            :root {
                --bg-body: #1a202c;
                --bg-container: #2d3748;
                --text-main: #f7fafc;
                --text-muted: #a0aec0;
                --border-color: #4a5568;
                --nav-bg: #171923;
                --summary-bg: #2c5282;
                --summary-border: #63b3ed;
                --card-bg: #2d3748;
                --card-border: #4a5568;
                --meta-bg: #4a5568;
                --meta-border: #718096;
                --error: #fc8181;
            }
            img { opacity: 0.9; }
        }
        body { font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, Helvetica, Arial, sans-serif; margin: 0; background: var(--bg-body); color: var(--text-main); padding-top: 60px; }
        .navbar { position: fixed; top: 0; width: 100%; background: var(--nav-bg); padding: 15px 20px; z-index: 1000; display: flex; gap: 20px; box-shadow: 0 2px 4px rgba(0,0,0,0.2); }
        .navbar a { color: var(--nav-text); text-decoration: none; font-weight: 600; font-size: 0.95rem; }
        .container { max-width: 1400px; margin: 20px auto; background: var(--bg-container); padding: 40px; border-radius: 8px; box-shadow: 0 4px 6px rgba(0,0,0,0.1); }
        h1, h2 { border-bottom: 2px solid var(--border-color); padding-bottom: 12px; margin-top: 40px; }
        h1 { margin-top: 0; }
        .summary-box { background: var(--summary-bg); padding: 20px; border-radius: 6px; margin-bottom: 30px; border-left: 5px solid var(--summary-border); }
        .metric-explanations { display: grid; grid-template-columns: repeat(auto-fit, minmax(250px, 1fr)); gap: 15px; margin-bottom: 40px; }
        .metric-card { background: var(--card-bg); padding: 15px; border-radius: 6px; border: 1px solid var(--card-border); font-size: 0.9em; }
        .metric-card h4 { margin: 0 0 5px 0; }
        .metric-card .columns { color: var(--text-muted); font-size: 0.85em; }
        .metrics-grid { display: grid; grid-template-columns: 1fr; gap: 40px; margin-bottom: 60px; }
        .graph-box { text-align: center; border: 1px solid var(--border-color); padding: 20px; border-radius: 8px; }
        .graph-box h3 { margin-top: 0; color: var(--text-muted); font-size: 1.2rem; }
        .graph-box img { width: 100%; height: auto; max-height: 600px; object-fit: contain; cursor: zoom-in; }
        .comparison-row { display: flex; flex-wrap: wrap; gap: 30px; padding: 30px 0; border-bottom: 1px solid var(--border-color); align-items: flex-start; }
        .row-error .meta { border-left-color: var(--error); color: var(--error); }
        .img-card { flex: 1; min-width: 45%; }
        .img-card img { width: 100%; border-radius: 6px; border: 1px solid var(--border-color); background: #edf2f7; cursor: zoom-in; }
        .no-diff { padding: 40px; text-align: center; color: var(--text-muted); border: 1px dashed var(--border-color); border-radius: 6px; }
        .meta { background: var(--meta-bg); padding: 12px; border-radius: 6px; margin-bottom: 12px; font-size: 0.95em; line-height: 1.6; border-left: 4px solid var(--meta-border); }
        .badge { display: inline-block; padding: 2px 8px; border-radius: 4px; font-size: 0.8rem; font-weight: bold; color: white; margin-right: 8px; text-transform: uppercase; background-color: #718096; }
        .badge-webp { background-color: #48bb78; }
        .badge-jpeg { background-color: #4299e1; }
        .lightbox { display: none; position: fixed; z-index: 2000; left: 0; top: 0; width: 100%; height: 100%; background-color: rgba(0,0,0,0.95); justify-content: center; align-items: center; flex-direction: column; }
        .lightbox-content { max-width: 95%; max-height: 85vh; object-fit: contain; }
        .lightbox-caption { color: white; margin-top: 15px; font-size: 1.1rem; background: rgba(0,0,0,0.5); padding: 5px 15px; border-radius: 20px; }
        .lightbox-close { position: absolute; top: 20px; right: 30px; color: #f1f1f1; font-size: 40px; font-weight: bold; cursor: pointer; }
        .lightbox-nav { position: absolute; top: 50%; padding: 16px; margin-top: -50px; color: white; font-weight: bold; font-size: 30px; cursor: pointer; user-select: none; background: rgba(0,0,0,0.3); }
        .prev { left: 20px; }
        .next { right: 20px; }
        .up { top: 60px; left: 50%; transform: translateX(-50%); margin-top: 0; padding: 10px 30px; }
        .down { top: auto; bottom: 60px; left: 50%; transform: translateX(-50%); margin-top: 0; padding: 10px 30px; }
        @media print {
            .navbar, .lightbox { display: none; }
            body { padding-top: 0; }
            .graph-box { page-break-inside: avoid; }
        }
    "#;

const SCRIPT: &str = r#"
        const isDark = () => window.matchMedia && window.matchMedia('(prefers-color-scheme: dark)').matches;
        const chartImgs = Array.from(document.querySelectorAll('.graph-box img'));
        chartImgs.forEach(img => { if (isDark() && img.dataset.darkSrc) img.src = img.dataset.darkSrc; });
        let chartIdx = 0;

        const rowData = Array.from(document.querySelectorAll('.comparison-row'))
            .map(row => ({
                img: row.querySelector('img[data-type="img"]'),
                diff: row.querySelector('img[data-type="diff"]'),
                meta: row.querySelector('.meta').innerText.split('\n')[0]
            }))
            .filter(r => r.img);
        let curRow = 0;
        let curView = 0;

        function openCharts(index) {
            chartIdx = index;
            const img = chartImgs[chartIdx];
            document.getElementById('lb-charts-img').src = img.src;
            document.getElementById('lb-charts-caption').innerText = img.dataset.caption || 'Chart';
            document.getElementById('lb-charts').style.display = 'flex';
            document.body.style.overflow = 'hidden';
        }

        function navCharts(dir) {
            chartIdx = (chartIdx + dir + chartImgs.length) % chartImgs.length;
            openCharts(chartIdx);
        }

        function openImgs(rowIndex, viewIndex) {
            curRow = rowIndex;
            curView = viewIndex;
            updateImgView();
            document.getElementById('lb-imgs').style.display = 'flex';
            document.body.style.overflow = 'hidden';
        }

        function updateImgView() {
            curRow = (curRow + rowData.length) % rowData.length;
            curView = (curView + 2) % 2;
            const data = rowData[curRow];
            const target = curView === 1 && data.diff ? data.diff : data.img;
            const label = target === data.diff ? 'Difference Map' : 'Compressed Image';
            document.getElementById('lb-imgs-img').src = target.src;
            document.getElementById('lb-imgs-caption').innerText = `[${curRow + 1}/${rowData.length}] ${data.meta} - ${label}`;
        }

        function navImgs(rowDir, viewDir) {
            curRow += rowDir;
            curView += viewDir;
            updateImgView();
        }

        function closeLb(id) {
            document.getElementById('lb-' + id).style.display = 'none';
            document.body.style.overflow = 'auto';
        }

        chartImgs.forEach((img, idx) => img.addEventListener('click', () => openCharts(idx)));
        rowData.forEach((data, idx) => {
            data.img.addEventListener('click', () => openImgs(idx, 0));
            if (data.diff) data.diff.addEventListener('click', () => openImgs(idx, 1));
        });

        document.addEventListener('keydown', (e) => {
            if (document.getElementById('lb-charts').style.display === 'flex') {
                if (e.key === 'ArrowLeft') navCharts(-1);
                if (e.key === 'ArrowRight') navCharts(1);
                if (e.key === 'Escape') closeLb('charts');
            } else if (document.getElementById('lb-imgs').style.display === 'flex') {
                if (e.key === 'ArrowLeft') navImgs(-1, 0);
                if (e.key === 'ArrowRight') navImgs(1, 0);
                if (e.key === 'ArrowUp') navImgs(0, -1);
                if (e.key === 'ArrowDown') navImgs(0, 1);
                if (e.key === 'Escape') closeLb('imgs');
            }
        });

        document.querySelectorAll('.lightbox').forEach(lb => {
            lb.addEventListener('click', (e) => {
                if (e.target === lb) {
                    lb.style.display = 'none';
                    document.body.style.overflow = 'auto';
                }
            });
        });
    "#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{group_metric_columns, ReportAggregator};
    use crate::report::tests::test_row;
    use crate::table::ResultTable;
    use std::path::Path;

    fn model() -> ReportModel {
        let table = ResultTable::from_rows(vec![
            test_row("webp", 90, &[("PSNR", 42.123), ("SSIM", 0.98765)]),
            test_row("webp", 10, &[("PSNR", 28.0), ("SSIM", 0.8)]),
        ]);
        ReportAggregator::new("run", "run").aggregate(Path::new("photo.png"), &table)
    }

    fn render(model: &ReportModel, charts: &[ChartImage]) -> String {
        let mut buf = Vec::new();
        write(&mut buf, model, charts).unwrap();
        String::from_utf8(buf).unwrap()
    }

    // ==========================================================================
    // ROW TEMPLATE
    // ==========================================================================

    #[test]
    fn test_row_contains_metrics_and_paths() {
        let model = model();
        let html = render_row(&model.rows[0], &model.groups).unwrap();
        assert!(html.contains("<strong>PSNR:</strong> 42.12"));
        assert!(html.contains("<strong>SSIM:</strong> 0.9877"));
        assert!(html.contains(r#"src="images/img_q90.webp""#));
        assert!(html.contains(r#"src="diffs/diff_img_q90.webp""#));
        assert!(html.contains("Settings: Q90"));
        assert!(html.contains(r#"data-index="0""#));
    }

    #[test]
    fn test_row_without_diff_shows_placeholder() {
        let mut model = model();
        model.rows[0].diff_src.clear();
        let html = render_row(&model.rows[0], &model.groups).unwrap();
        assert!(html.contains("Difference image unavailable"));
        assert!(!html.contains(r#"data-type="diff""#));
    }

    #[test]
    fn test_missing_metric_is_row_error() {
        let mut model = model();
        model.rows[1].metrics.remove("SSIM");
        assert_eq!(
            render_row(&model.rows[1], &model.groups),
            Err(RowRenderError::MissingMetric("SSIM".to_string()))
        );
    }

    #[test]
    fn test_text_metric_is_row_error() {
        let mut model = model();
        model.rows[0]
            .metrics
            .insert("PSNR".to_string(), MetricValue::Text("oops".to_string()));
        let err = render_row(&model.rows[0], &model.groups).unwrap_err();
        assert!(matches!(err, RowRenderError::NotNumeric { .. }));
    }

    #[test]
    fn test_lossless_setting_label() {
        let mut model = model();
        model.rows[0].lossless = true;
        let html = render_row(&model.rows[0], &model.groups).unwrap();
        assert!(html.contains("Settings: Lossless"));
    }

    // ==========================================================================
    // FULL DOCUMENT
    // ==========================================================================

    #[test]
    fn test_document_keeps_rendering_after_bad_row() {
        let mut model = model();
        model.rows[0].metrics.clear();
        let html = render(&model, &[]);

        assert_eq!(html.matches(r#"class="comparison-row row-error""#).count(), 1);
        assert!(html.contains("Could not render <strong>img_q90.webp</strong>"));
        assert!(html.contains(r#"src="images/img_q10.webp""#));
        assert!(html.trim_end().ends_with("</html>"));
    }

    #[test]
    fn test_document_lists_charts_with_dark_variant() {
        let charts = vec![ChartImage {
            title: "Quality Setting vs File Size".to_string(),
            src: "graphs/size_vs_quality.svg".to_string(),
            dark_src: Some("graphs/size_vs_quality_dark.svg".to_string()),
        }];
        let html = render(&model(), &charts);
        assert!(html.contains(r#"src="graphs/size_vs_quality.svg""#));
        assert!(html.contains(r#"data-dark-src="graphs/size_vs_quality_dark.svg""#));
    }

    #[test]
    fn test_document_summary_and_legend() {
        let html = render(&model(), &[]);
        assert!(html.contains("<strong>Input Image:</strong> photo.png"));
        assert!(html.contains("<strong>Total Variants:</strong> 2"));
        assert!(html.contains("Peak Signal-to-Noise Ratio"));
        assert_eq!(html.matches(r#"class="comparison-row""#).count(), 2);
    }

    #[test]
    fn test_document_navigation_anchors() {
        let html = render(&model(), &[]);
        for anchor in ["top", "summary", "metrics-info", "graphs", "comparisons"] {
            assert!(html.contains(&format!(r##"<a href="#{}">"##, anchor)));
            assert!(html.contains(&format!(r#"id="{}""#, anchor)));
        }
        assert!(html.contains(r#"<h2 id="comparisons">Visual Inspection</h2>"#));
    }

    #[test]
    fn test_format_metric_precision() {
        assert_eq!(format_metric(0.987654), "0.9877");
        assert_eq!(format_metric(42.126), "42.13");
        assert_eq!(format_metric(999.0), "999.00");
    }

    #[test]
    fn test_grouping_used_for_headline() {
        let groups = group_metric_columns(&["SSIM-Red"]);
        let mut row = model().rows[0].clone();
        row.metrics.insert("SSIM-Red".to_string(), MetricValue::Number(0.5));
        let html = render_row(&row, &groups).unwrap();
        assert!(html.contains("<strong>SSIM-Red:</strong> 0.5000"));
    }
}
