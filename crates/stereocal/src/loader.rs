use std::collections::HashMap;
use std::path::{Path, PathBuf};

use stereocal_image::{Image, ImageSize};

use crate::error::ImageLoadError;

/// Source of the grayscale calibration images.
///
/// Implementations are called once per identifier; a failure excludes the pair and
/// is never retried.
pub trait ImageLoader {
    /// Load the image named `id` as 8-bit grayscale.
    fn load(&self, id: &str) -> Result<Image<u8, 1>, ImageLoadError>;
}

/// Reads an image file in any format supported by the image crate as grayscale.
///
/// # Arguments
///
/// * `file_path` - The path to a valid image file.
///
/// # Returns
///
/// The image converted to 8-bit luma.
pub fn read_image_gray(file_path: impl AsRef<Path>) -> Result<Image<u8, 1>, ImageLoadError> {
    let file_path = file_path.as_ref().to_owned();
    if !file_path.exists() {
        return Err(ImageLoadError::FileDoesNotExist(file_path));
    }

    let img = ::image::ImageReader::open(&file_path)?
        .with_guessed_format()?
        .decode()?;

    let size = ImageSize {
        width: img.width() as usize,
        height: img.height() as usize,
    };
    let image = Image::<u8, 1>::new(size, img.into_luma8().into_raw())?;
    Ok(image)
}

/// Loads identifiers as file paths, optionally relative to a root directory.
#[derive(Clone, Debug, Default)]
pub struct FileImageLoader {
    root: Option<PathBuf>,
}

impl FileImageLoader {
    /// Create a loader resolving identifiers as given.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative identifiers against `root`.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    fn resolve(&self, id: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(id),
            None => PathBuf::from(id),
        }
    }
}

impl ImageLoader for FileImageLoader {
    fn load(&self, id: &str) -> Result<Image<u8, 1>, ImageLoadError> {
        read_image_gray(self.resolve(id))
    }
}

/// Serves images kept in memory, keyed by identifier.
#[derive(Clone, Debug, Default)]
pub struct InMemoryLoader {
    images: HashMap<String, Image<u8, 1>>,
}

impl InMemoryLoader {
    /// Create an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an image under `id`, replacing any previous one.
    pub fn insert(&mut self, id: impl Into<String>, image: Image<u8, 1>) {
        self.images.insert(id.into(), image);
    }

    /// Number of registered images.
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Whether no image is registered.
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl ImageLoader for InMemoryLoader {
    fn load(&self, id: &str) -> Result<Image<u8, 1>, ImageLoadError> {
        self.images
            .get(id)
            .cloned()
            .ok_or_else(|| ImageLoadError::UnknownId(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_loader() -> Result<(), Box<dyn std::error::Error>> {
        let mut loader = InMemoryLoader::new();
        assert!(loader.is_empty());
        loader.insert("left", Image::from_size_val([4, 3].into(), 7u8)?);
        assert_eq!(loader.len(), 1);

        let image = loader.load("left")?;
        assert_eq!(image.size(), ImageSize { width: 4, height: 3 });
        assert!(matches!(
            loader.load("right"),
            Err(ImageLoadError::UnknownId(id)) if id == "right"
        ));
        Ok(())
    }

    #[test]
    fn test_file_loader_missing() {
        let loader = FileImageLoader::new().with_root("/definitely/not/here");
        assert!(matches!(
            loader.load("left01.png"),
            Err(ImageLoadError::FileDoesNotExist(_))
        ));
    }
}
