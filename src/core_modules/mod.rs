pub mod component;
pub mod extractor;
pub mod feature;
pub mod patch_grid;
pub mod prototype;
pub mod scorer;
