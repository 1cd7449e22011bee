use anyhow::anyhow;
use formatx::formatx;
use std::fmt::Debug;
use std::fs::{self, File};
use std::io;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// Destination for the documents a run produces, addressed by location key (`"logbook"`,
/// `"normalized_bills"`, ...).
pub trait Output: Debug {
    fn writer_for_location_key(&self, location_key: &str) -> anyhow::Result<impl Write>;
    /// True when nothing written here is kept, so work done only to produce output can be skipped.
    fn is_noop(&self) -> bool {
        false
    }
}

/// Writes each location key to a file in a directory, named by filling the `{}` in a template
/// such as `"{}.json"` with the key.
#[derive(Debug)]
pub struct FileOutput {
    directory_path: PathBuf,
    file_template: String,
}

impl FileOutput {
    pub fn new(directory_path: PathBuf, file_template: String) -> Self {
        Self {
            directory_path,
            file_template,
        }
    }

    pub fn path_for_location_key(&self, location_key: &str) -> anyhow::Result<PathBuf> {
        let file_name = formatx!(&self.file_template, location_key).map_err(|e| {
            anyhow!(
                "Output file template '{}' could not be filled: {e:?}",
                self.file_template
            )
        })?;

        Ok(self.directory_path.join(file_name))
    }
}

impl Output for FileOutput {
    fn writer_for_location_key(&self, location_key: &str) -> anyhow::Result<impl Write> {
        fs::create_dir_all(&self.directory_path)?;
        Ok(BufWriter::new(File::create(
            self.path_for_location_key(location_key)?,
        )?))
    }
}

impl<T: Output> Output for &T {
    fn writer_for_location_key(&self, location_key: &str) -> anyhow::Result<impl Write> {
        (**self).writer_for_location_key(location_key)
    }

    fn is_noop(&self) -> bool {
        (**self).is_noop()
    }
}

/// Discards everything written to it.
#[derive(Debug, Default)]
pub struct SinkOutput;

impl Output for SinkOutput {
    fn writer_for_location_key(&self, _location_key: &str) -> anyhow::Result<impl Write> {
        Ok(io::sink())
    }

    fn is_noop(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;
    use std::env;

    #[rstest]
    fn should_name_files_from_the_template() {
        let output = FileOutput::new(PathBuf::from("/tmp/results"), "{}.json".to_string());
        assert_eq!(
            output.path_for_location_key("logbook").unwrap(),
            PathBuf::from("/tmp/results/logbook.json")
        );
    }

    #[rstest]
    fn should_create_the_output_directory() {
        let directory = env::temp_dir().join(format!("hpxml-calibration-output-{}", std::process::id()));
        let output = FileOutput::new(directory.clone(), "{}.txt".to_string());
        {
            let mut writer = (&output).writer_for_location_key("notes").unwrap();
            writer.write_all(b"hello").unwrap();
        }
        assert_eq!(
            fs::read_to_string(directory.join("notes.txt")).unwrap(),
            "hello"
        );
        fs::remove_dir_all(&directory).unwrap();
    }

    #[rstest]
    fn should_report_sink_as_noop() {
        assert!(SinkOutput.is_noop());
        assert!((&SinkOutput).is_noop());
        assert!(!FileOutput::new(PathBuf::new(), "{}".to_string()).is_noop());
    }
}
