use std::path::Path;

use tempfile::NamedTempFile;

use crate::Result;

/// Input/output file pair for one enhancement request.
///
/// Both files are created empty in `dir` and removed when the value is
/// dropped, whichever way the owning scope exits.
#[derive(Debug)]
pub struct ScopedImageFiles {
    input: NamedTempFile,
    output: NamedTempFile,
}

impl ScopedImageFiles {
    pub fn acquire(dir: &Path) -> Result<Self> {
        let input = tempfile::Builder::new()
            .prefix("in_")
            .suffix(".jpg")
            .tempfile_in(dir)?;
        let output = tempfile::Builder::new()
            .prefix("out_")
            .suffix(".jpg")
            .tempfile_in(dir)?;
        Ok(Self { input, output })
    }

    pub fn input(&self) -> &Path {
        self.input.path()
    }

    pub fn output(&self) -> &Path {
        self.output.path()
    }

    /// Remove both files now and report failures instead of swallowing them.
    pub fn release(self) -> Result<()> {
        self.input.close()?;
        self.output.close()?;
        Ok(())
    }
}
