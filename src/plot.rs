/// Renders t-SNE projections of labeled features as scatter plots.
///
/// Every call builds its own `ScatterPlot` and drawing area, so repeated calls in one process
/// never see each other's points.

use std::fmt::Display;
use std::path::{Path, PathBuf};

use log::{debug, info};
use ndarray::Array2;
use plotters::prelude::*;

use crate::config::{PlotConfig, TsneConfig};
use crate::error::{Error, Result};
use crate::features::LabeledFeature;
use crate::tsne::{DimensionReducer, Tsne};

/// Seaborn's "deep" palette. Colors are assigned by position in the full class list,
/// cycling once there are more than ten classes.
pub const DEEP_PALETTE: [RGBColor; 10] = [
    RGBColor(76, 114, 176),
    RGBColor(221, 132, 82),
    RGBColor(85, 168, 104),
    RGBColor(196, 78, 82),
    RGBColor(129, 114, 179),
    RGBColor(147, 120, 96),
    RGBColor(218, 139, 195),
    RGBColor(140, 140, 140),
    RGBColor(204, 185, 116),
    RGBColor(100, 181, 205),
];

const FIGURE_BACKGROUND: RGBColor = RGBColor(192, 192, 192);

pub fn class_color(class_index: usize) -> RGBColor
{
    DEEP_PALETTE[class_index % DEEP_PALETTE.len()]
}

/// Path of the plot for `name` at `epoch`: `<output_dir>/TSNE_<name>/epoch_<epoch>.png`.
pub fn tsne_graph_path(output_dir: &Path, epoch: impl Display, name: &str) -> PathBuf
{
    output_dir
        .join(format!("TSNE_{}", name))
        .join(format!("epoch_{}.png", epoch))
}

/// Projects `records` to 2D with t-SNE and saves a scatter plot colored by class.
///
/// `classes` is the full ordered class list of the dataset, not just the classes present in
/// `records`, so that colors and legend order stay the same across models and epochs.
/// The plot directory is created if needed and an existing plot for the same name and epoch
/// is overwritten.
///
/// Returns the path of the written PNG.
pub fn tsne_graph(
    records: &[LabeledFeature],
    output_dir: &Path,
    epoch: impl Display,
    name: &str,
    classes: &[String],
    tsne_config: &TsneConfig,
    plot_config: &PlotConfig,
) -> Result<PathBuf>
{
    let features = stack_features(records)?;
    debug!("Projecting {} {} features of length {}", features.nrows(), name, features.ncols());

    let coordinates = Tsne::new(tsne_config.clone()).fit_transform(&features)?;

    let mut plot = ScatterPlot::new(format!("{}, Epoch: {}", name, epoch), classes, plot_config);
    for (record, point) in records.iter().zip(coordinates.outer_iter()) {
        plot.add_point(&record.label, point[0], point[1]);
    }

    let fig_path = tsne_graph_path(output_dir, &epoch, name);
    if let Some(save_path) = fig_path.parent() {
        std::fs::create_dir_all(save_path)?;
    }

    plot.render(&fig_path)?;
    info!("Saved {} t-SNE plot to {:?}", name, fig_path);

    Ok(fig_path)
}

/// Flattens every record's feature into one row of an (N, D) matrix.
/// All features must have the same length.
pub fn stack_features(records: &[LabeledFeature]) -> Result<Array2<f64>>
{
    let first = records.first().ok_or(Error::EmptyFeatures)?;
    let feature_length = first.feature.len();

    let mut values = Vec::with_capacity(records.len() * feature_length);
    for (index, record) in records.iter().enumerate()
    {
        if record.feature.len() != feature_length {
            return Err(Error::DimensionMismatch {
                index,
                expected: feature_length,
                found: record.feature.len(),
            });
        }
        values.extend(record.feature.iter().map(|x| *x as f64));
    }

    Ok(Array2::from_shape_vec((records.len(), feature_length), values)?)
}

struct ClassSeries
{
    name: String,
    color: RGBColor,
    points: Vec<(f64, f64)>,
}

/// A scatter plot with one series per class, on fixed symmetric axes.
pub struct ScatterPlot
{
    title: String,
    series: Vec<ClassSeries>,
    config: PlotConfig,
}

impl ScatterPlot
{
    pub fn new(title: impl Into<String>, classes: &[String], config: &PlotConfig) -> Self
    {
        let series = classes
            .iter()
            .enumerate()
            .map(|(index, class)| ClassSeries {
                name: class.clone(),
                color: class_color(index),
                points: Vec::new(),
            })
            .collect();

        ScatterPlot {
            title: title.into(),
            series,
            config: config.clone(),
        }
    }

    /// Adds a point to its class's series.
    /// Returns false, and drops the point, if `label` is not one of the plot's classes.
    pub fn add_point(&mut self, label: &str, x: f64, y: f64) -> bool
    {
        match self.series.iter_mut().find(|series| series.name == label) {
            Some(series) => {
                series.points.push((x, y));
                true
            },
            None => {
                debug!("Dropping point with unknown label {:?}", label);
                false
            },
        }
    }

    /// Legend entries in order, with their colors. Classes without points are included.
    pub fn legend(&self) -> Vec<(&str, RGBColor)>
    {
        self.series.iter().map(|series| (series.name.as_str(), series.color)).collect()
    }

    /// Number of points that fall inside the axes and will actually be drawn.
    pub fn visible_points(&self) -> usize
    {
        self.series.iter().map(|series| series.points.iter().filter(|p| self.is_visible(**p)).count()).sum()
    }

    fn is_visible(&self, (x, y): (f64, f64)) -> bool
    {
        let limit = self.config.axis_limit;
        x.is_finite() && y.is_finite() && x.abs() <= limit && y.abs() <= limit
    }

    pub fn render(&self, path: &Path) -> Result<()>
    {
        self.draw(path).map_err(|e| Error::Plot(format!("{:?}: {}", path, e)))
    }

    fn draw(&self, path: &Path) -> std::result::Result<(), Box<dyn std::error::Error>>
    {
        let root = BitMapBackend::new(path, (self.config.width, self.config.height)).into_drawing_area();
        root.fill(&FIGURE_BACKGROUND)?;

        let limit = self.config.axis_limit;
        let mut chart = ChartBuilder::on(&root)
            .caption(&self.title, ("sans-serif", 30).into_font())
            .margin(20)
            .x_label_area_size(50)
            .y_label_area_size(60)
            .build_cartesian_2d(-limit..limit, -limit..limit)?;

        chart.plotting_area().fill(&WHITE)?;
        chart
            .configure_mesh()
            .x_desc("comp-1")
            .y_desc("comp-2")
            .draw()?;

        let point_size = self.config.point_size;
        for series in &self.series
        {
            let color = series.color;
            // Points outside the fixed axes are left out rather than widening the axes.
            let visible = series.points.iter().copied().filter(|p| self.is_visible(*p));
            chart
                .draw_series(visible.map(|(x, y)| Circle::new((x, y), point_size, color.filled())))?
                .label(series.name.as_str())
                .legend(move |(x, y)| Circle::new((x, y), point_size, color.filled()));
        }

        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperLeft)
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()?;

        root.present()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::test_support::{class_names, fast_tsne_config};

    fn records(num_classes: usize, per_class: usize, dim: usize) -> Vec<LabeledFeature>
    {
        let classes = class_names(num_classes);
        let mut records = Vec::new();
        for (c, class) in classes.iter().enumerate() {
            for i in 0..per_class {
                let feature = (0..dim).map(|d| (c * 10) as f32 + ((i + d) % 3) as f32 * 0.1).collect();
                records.push(LabeledFeature { label: class.clone(), feature });
            }
        }
        records
    }

    #[test]
    fn test_graph_path_convention()
    {
        let path = tsne_graph_path(Path::new("/tmp/out"), 3, "teacher");
        assert_eq!(path, PathBuf::from("/tmp/out/TSNE_teacher/epoch_3.png"));
        let path = tsne_graph_path(Path::new("out"), "final", "student");
        assert_eq!(path, PathBuf::from("out/TSNE_student/epoch_final.png"));
    }

    #[test]
    fn test_tsne_graph_writes_png()
    {
        let dir = tempfile::tempdir().unwrap();
        let classes = class_names(3);
        let records = records(3, 4, 5);

        let path = tsne_graph(&records, dir.path(), 0, "teacher", &classes, &fast_tsne_config(), &PlotConfig::default()).unwrap();

        assert_eq!(path, dir.path().join("TSNE_teacher").join("epoch_0.png"));
        assert!(path.exists());
        assert_eq!(image::image_dimensions(&path).unwrap(), (1200, 1200));
    }

    #[test]
    fn test_tsne_graph_accepts_string_epochs()
    {
        let dir = tempfile::tempdir().unwrap();
        let classes = class_names(2);
        let records = records(2, 3, 4);

        let path = tsne_graph(&records, dir.path(), "best-val", "student", &classes, &fast_tsne_config(), &PlotConfig::default()).unwrap();
        assert_eq!(path, dir.path().join("TSNE_student").join("epoch_best-val.png"));
        assert!(path.exists());
    }

    #[test]
    fn test_tsne_graph_overwrites()
    {
        let dir = tempfile::tempdir().unwrap();
        let classes = class_names(2);
        let records = records(2, 3, 4);

        let first = tsne_graph(&records, dir.path(), 1, "teacher", &classes, &fast_tsne_config(), &PlotConfig::default()).unwrap();
        let second = tsne_graph(&records, dir.path(), 1, "teacher", &classes, &fast_tsne_config(), &PlotConfig::default()).unwrap();

        assert_eq!(first, second);
        let files = std::fs::read_dir(dir.path().join("TSNE_teacher")).unwrap().count();
        assert_eq!(files, 1);
    }

    #[test]
    fn test_ragged_features_fail()
    {
        let dir = tempfile::tempdir().unwrap();
        let classes = class_names(1);
        let records = vec![
            LabeledFeature { label: classes[0].clone(), feature: vec![1.0, 2.0, 3.0] },
            LabeledFeature { label: classes[0].clone(), feature: vec![1.0, 2.0] },
        ];

        let result = tsne_graph(&records, dir.path(), 0, "teacher", &classes, &fast_tsne_config(), &PlotConfig::default());
        assert!(matches!(result, Err(Error::DimensionMismatch { index: 1, expected: 3, found: 2 })));
        assert!(!dir.path().join("TSNE_teacher").join("epoch_0.png").exists());
    }

    #[test]
    fn test_empty_records_fail()
    {
        assert!(matches!(stack_features(&[]), Err(Error::EmptyFeatures)));
    }

    #[test]
    fn test_stack_features_shape()
    {
        let stacked = stack_features(&records(2, 3, 4)).unwrap();
        assert_eq!(stacked.shape(), &[6, 4]);
        assert_eq!(stacked[[3, 0]], 10.0);
    }

    #[test]
    fn test_legend_keeps_every_class_in_order()
    {
        let classes = class_names(12);
        let mut plot = ScatterPlot::new("teacher, Epoch: 0", &classes, &PlotConfig::default());
        assert!(plot.add_point(&classes[2], 1.0, 1.0));

        let legend = plot.legend();
        assert_eq!(legend.len(), 12);
        assert_eq!(legend[0].0, classes[0]);
        assert_eq!(legend[2].1, DEEP_PALETTE[2]);
        // The palette cycles after ten classes.
        assert_eq!(legend[10].1, DEEP_PALETTE[0]);
    }

    #[test]
    fn test_render_draws_title_text()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plot.png");
        let classes = class_names(3);
        let mut plot = ScatterPlot::new("teacher, Epoch: 0", &classes, &PlotConfig::default());
        plot.add_point(&classes[0], 1.0, 2.0);
        plot.add_point(&classes[1], -10.0, 5.0);

        plot.render(&path).unwrap();

        // The caption sits in the top margin, above the plotting area, which is otherwise
        // left in the figure background color.
        let image = image::open(&path).unwrap().to_rgb8();
        let background = image::Rgb([FIGURE_BACKGROUND.0, FIGURE_BACKGROUND.1, FIGURE_BACKGROUND.2]);
        let caption_pixels = (0..60u32)
            .flat_map(|y| (300..900u32).map(move |x| (x, y)))
            .filter(|&(x, y)| *image.get_pixel(x, y) != background)
            .count();
        assert!(caption_pixels > 0);
    }

    #[test]
    fn test_points_outside_axes_are_hidden()
    {
        let classes = class_names(2);
        let mut plot = ScatterPlot::new("t", &classes, &PlotConfig::default());
        plot.add_point(&classes[0], 0.0, 0.0);
        plot.add_point(&classes[0], 80.0, -80.0);
        plot.add_point(&classes[1], 81.0, 0.0);
        plot.add_point(&classes[1], 0.0, -120.0);
        assert!(!plot.add_point("not a class", 0.0, 0.0));

        assert_eq!(plot.visible_points(), 2);
    }
}
