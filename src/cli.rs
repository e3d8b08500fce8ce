use clap::ValueEnum;

use crate::message::DownloadOptions;

/// How images are delivered.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Follow the request's `zip_download` option
    Auto,
    /// Fetch everything and save one ZIP archive
    Zip,
    /// Save every image as its own file
    Direct,
}

impl Mode {
    pub fn apply(self, options: &mut DownloadOptions) {
        match self {
            Mode::Auto => {}
            Mode::Zip => options.zip_download = true,
            Mode::Direct => options.zip_download = false,
        }
    }
}
