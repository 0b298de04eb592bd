#![forbid(unsafe_code)]

use std::env;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sixfs_defrag::defragment_image;
use sixfs_error::DefragError;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Directory the rewritten image is placed in, relative to the working
/// directory.
const OUTPUT_DIR: &str = "output-disk-image";
/// Output file name prefix; the final character of the input path is
/// appended to it.
const OUTPUT_PREFIX: &str = "disk-defrag-";

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        let code = error
            .downcast_ref::<DefragError>()
            .map_or(1, DefragError::exit_code);
        std::process::exit(code);
    }
}

fn run() -> Result<()> {
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    let [input_path] = args.as_slice() else {
        print_usage();
        return Err(DefragError::Usage("expected exactly one disk-image path".to_owned()).into());
    };

    let image = load_image(Path::new(input_path))?;
    debug!(path = %input_path, bytes = image.len(), "loaded_image");

    let output = defragment_image(&image)?;

    let out_path = output_path(input_path);
    write_image(&out_path, &output)?;
    debug!(path = %out_path.display(), bytes = output.len(), "wrote_image");

    Ok(())
}

/// Install the process-wide subscriber before anything can emit an event.
/// `RUST_LOG` selects levels; the default shows warnings and errors only,
/// on stderr (stdout stays silent on success).
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_usage() {
    println!("sixfs-cli\n");
    println!("USAGE:");
    println!("  sixfs-cli <disk-image>");
    println!();
    println!("Writes the defragmented image to {OUTPUT_DIR}/{OUTPUT_PREFIX}<k>,");
    println!("where <k> is the last character of the input path.");
}

/// Read the whole image in one pass, sized by a metadata query up front.
///
/// The metadata length is authoritative: a file that delivers fewer bytes
/// is reported as truncated, and any bytes past that length are ignored.
fn load_image(path: &Path) -> Result<Vec<u8>> {
    let metadata = fs::metadata(path)
        .map_err(DefragError::Io)
        .with_context(|| format!("failed to read size of {}", path.display()))?;
    let expected = metadata.len();

    let file = File::open(path)
        .map_err(DefragError::Io)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let mut image = Vec::new();
    let actual = file
        .take(expected)
        .read_to_end(&mut image)
        .map_err(DefragError::Io)
        .with_context(|| format!("failed to read {}", path.display()))?;

    if (actual as u64) < expected {
        return Err(DefragError::TruncatedImage {
            expected,
            actual: actual as u64,
        }
        .into());
    }

    Ok(image)
}

/// Output path derived from the input path: the fixed output directory and
/// prefix, plus the final character of the input path.
fn output_path(input: &str) -> PathBuf {
    let tag = input.chars().last().map(String::from).unwrap_or_default();
    Path::new(OUTPUT_DIR).join(format!("{OUTPUT_PREFIX}{tag}"))
}

/// Write the rewritten image, creating the output directory on demand.
/// All or nothing: a failed write does not leave a partial image behind.
fn write_image(path: &Path, image: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(DefragError::Io)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    if let Err(error) = fs::write(path, image) {
        let _ = fs::remove_file(path);
        return Err(DefragError::Io(error))
            .with_context(|| format!("failed to write {}", path.display()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_path_uses_last_character_of_input() {
        assert_eq!(
            output_path("disk-images/datafile-fragmented-3"),
            Path::new("output-disk-image/disk-defrag-3")
        );
        assert_eq!(
            output_path("7"),
            Path::new("output-disk-image/disk-defrag-7")
        );
        assert_eq!(output_path(""), Path::new("output-disk-image/disk-defrag-"));
    }

    #[test]
    fn load_image_round_trips_file_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("image");
        fs::write(&path, [7_u8, 8, 9]).expect("write fixture");

        let image = load_image(&path).expect("load");
        assert_eq!(image, vec![7, 8, 9]);
    }

    #[test]
    fn load_image_reports_missing_file_as_io() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load_image(&dir.path().join("absent")).expect_err("reject");
        assert!(matches!(
            err.downcast_ref::<DefragError>(),
            Some(DefragError::Io(_))
        ));
    }

    #[test]
    fn load_image_reports_unreadable_input_as_io() {
        // A directory passes the size query and open but fails the read.
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load_image(dir.path()).expect_err("reject");
        assert!(matches!(
            err.downcast_ref::<DefragError>(),
            Some(DefragError::Io(_))
        ));
    }

    #[test]
    fn write_image_creates_the_output_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("output-disk-image").join("disk-defrag-1");

        write_image(&path, &[1, 2, 3]).expect("write");
        assert_eq!(fs::read(&path).expect("read back"), vec![1, 2, 3]);
    }
}
