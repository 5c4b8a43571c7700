// Tag files - `channel,time` CSV with a header row

use crate::error::{Result, TagStreamError};
use crate::types::Tag;
use std::path::Path;

pub fn read_tag_file(path: impl AsRef<Path>) -> Result<Vec<Tag>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)?;

    let mut tags = Vec::new();
    for record in reader.deserialize() {
        let tag: Tag = record?;
        tags.push(tag);
    }

    if let Some(i) = tags.windows(2).position(|w| w[1].time < w[0].time) {
        return Err(TagStreamError::InvalidParameter(format!(
            "{}: tags are not time ordered at row {}",
            path.display(),
            i + 2
        )));
    }

    log::debug!("Read {} tags from {}", tags.len(), path.display());
    Ok(tags)
}

pub fn write_tag_file(path: impl AsRef<Path>, tags: &[Tag]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    for tag in tags {
        writer.serialize(tag)?;
    }
    writer.flush()?;
    Ok(())
}
