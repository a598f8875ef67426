use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use distill_eval::config::EvaluationConfig;
use distill_eval::dataset::{DataSource, ImageFolder};
use distill_eval::evaluation::Evaluation;
use distill_eval::features::StudentFeatureSource;
use distill_eval::onnx::{OnnxEncoder, DEFAULT_INTRA_THREADS};
use distill_eval::tracking::{JsonlTracker, NoopTracker, TrackingSink};
use log::info;
use log::LevelFilter;

#[cfg(debug_assertions)]
const LOG_LEVEL: LevelFilter = LevelFilter::Debug;
#[cfg(not(debug_assertions))]
const LOG_LEVEL: LevelFilter = LevelFilter::Info;

/// Plot t-SNE projections of a teacher and a student model's embeddings of an image folder.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args
{
    /// ONNX file of the teacher model.
    #[arg(long)]
    teacher: PathBuf,

    /// ONNX file of the student model.
    #[arg(long)]
    student: PathBuf,

    /// Image folder laid out as <data>/<class>/<images>.
    #[arg(long)]
    data: PathBuf,

    /// Plots are written to <output-dir>/TSNE_<teacher|student>/epoch_<epoch>.png.
    #[arg(long)]
    output_dir: PathBuf,

    #[arg(long, default_value = "")]
    epoch: String,

    /// JSON evaluation config. Fields that are left out keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSONL file the plots are published to when --publish is set.
    #[arg(long)]
    metrics: Option<PathBuf>,

    #[arg(long)]
    publish: bool,

    /// Overrides the config's student_features.
    #[arg(long, value_enum)]
    student_features: Option<StudentFeaturesArg>,

    /// Name of the model output holding the embedding. Defaults to the first output.
    #[arg(long)]
    output_name: Option<String>,

    #[arg(long, default_value_t = DEFAULT_INTRA_THREADS)]
    intra_threads: usize,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StudentFeaturesArg
{
    TeacherTwiceNormalized,
    StudentNormalized,
}

impl From<StudentFeaturesArg> for StudentFeatureSource
{
    fn from(arg: StudentFeaturesArg) -> Self
    {
        match arg {
            StudentFeaturesArg::TeacherTwiceNormalized => StudentFeatureSource::TeacherTwiceNormalized,
            StudentFeaturesArg::StudentNormalized => StudentFeatureSource::StudentNormalized,
        }
    }
}

fn main() -> anyhow::Result<()> {
    // RUST_LOG still overrides the default level.
    env_logger::Builder::new()
        .filter_level(LOG_LEVEL)
        .parse_default_env()
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EvaluationConfig::from_json_file(path)?,
        None => EvaluationConfig::default(),
    };
    if args.publish {
        config.publish = true;
    }
    if let Some(student_features) = args.student_features {
        config.student_features = student_features.into();
    }

    let mut sink: Box<dyn TrackingSink> = match &args.metrics {
        Some(path) => Box::new(JsonlTracker::new(path)?),
        None => {
            if config.publish {
                log::warn!("Publishing is enabled but no --metrics file was given; plots will not be published anywhere.");
            }
            Box::new(NoopTracker)
        },
    };

    let mut teacher = OnnxEncoder::new(&args.teacher, args.intra_threads)?;
    let mut student = OnnxEncoder::new(&args.student, args.intra_threads)?;
    if let Some(output_name) = &args.output_name {
        teacher = teacher.with_output(output_name);
        student = student.with_output(output_name);
    }
    let data = ImageFolder::open(&args.data, &config)?;
    info!("Classes: {:?}", data.classes());

    let now = std::time::Instant::now();
    let paths = Evaluation::new(config).run(
        &mut teacher,
        &mut student,
        &data,
        &args.output_dir,
        &args.epoch,
        sink.as_mut(),
    )?;
    info!("Evaluation took {:?}", now.elapsed());
    info!("Teacher plot: {:?}", paths.teacher);
    info!("Student plot: {:?}", paths.student);

    Ok(())
}

#[cfg(test)]
mod tests
{
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition()
    {
        Args::command().debug_assert();
    }

    #[test]
    fn test_output_name_and_overrides()
    {
        let args = Args::try_parse_from([
            "distill-eval",
            "--teacher", "t.onnx",
            "--student", "s.onnx",
            "--data", "images",
            "--output-dir", "out",
            "--output-name", "embeddings",
            "--student-features", "student-normalized",
        ])
        .unwrap();

        assert_eq!(args.output_name.as_deref(), Some("embeddings"));
        assert_eq!(args.epoch, "");
        assert!(!args.publish);
        assert_eq!(args.intra_threads, DEFAULT_INTRA_THREADS);
        assert!(matches!(args.student_features, Some(StudentFeaturesArg::StudentNormalized)));

        let args = Args::try_parse_from(["distill-eval", "--teacher", "t.onnx", "--student", "s.onnx", "--data", "d", "--output-dir", "o"]).unwrap();
        assert!(args.output_name.is_none());
    }
}
