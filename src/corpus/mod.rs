//! Corpus loading: card images and questions.
//!
//! ## Example
//!
//! ```rust,ignore
//! use card_eval::corpus::Corpus;
//! use card_eval::config::Pairing;
//!
//! let corpus = Corpus::load("data/images", "data/questions.txt")?;
//! for (image, question) in corpus.pairs(Pairing::Zip) {
//!     println!("{} -> {}", image.name, question);
//! }
//! ```

mod discovery;
mod question;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use discovery::{compare_numeric_names, list_images};
pub use question::{MULTI_TURN_SEGMENTS, QuestionSpec, TURN_DELIMITER, load_questions};

use crate::attachment::ImageAttachment;
use crate::config::Pairing;
use crate::error::Result;

/// An image in the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusImage {
    /// File name, used as the image identifier in results.
    pub name: String,

    /// Full path to the file.
    pub path: PathBuf,

    /// File size in bytes.
    pub file_size: u64,
}

impl CorpusImage {
    /// Read the image into an attachment.
    pub fn load(&self) -> Result<ImageAttachment> {
        let bytes = std::fs::read(&self.path)?;
        Ok(ImageAttachment::new(self.name.clone(), bytes))
    }
}

/// Ordered images and raw question lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Corpus {
    /// Directory the images were listed from.
    pub root_path: PathBuf,

    /// Images in numeric order.
    pub images: Vec<CorpusImage>,

    /// Question lines in file order.
    pub questions: Vec<String>,
}

impl Corpus {
    /// List images and read questions. Either being empty is an error.
    pub fn load(images_dir: impl AsRef<Path>, questions_path: impl AsRef<Path>) -> Result<Self> {
        let root_path = images_dir.as_ref().to_path_buf();
        let images = list_images(&root_path)?;
        let questions = load_questions(questions_path.as_ref())?;
        Ok(Self { root_path, images, questions })
    }

    /// (image, question) pairs in run order.
    #[must_use]
    pub fn pairs(&self, pairing: Pairing) -> Vec<(&CorpusImage, &str)> {
        match pairing {
            Pairing::Zip => self
                .images
                .iter()
                .zip(self.questions.iter().map(String::as_str))
                .collect(),
            Pairing::Cross => self
                .images
                .iter()
                .flat_map(|img| self.questions.iter().map(move |q| (img, q.as_str())))
                .collect(),
        }
    }

    /// Total size of the listed images in bytes.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.images.iter().map(|img| img.file_size).sum()
    }
}
