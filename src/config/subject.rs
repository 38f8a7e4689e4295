//! Subject folders: locating config files and creating new subjects.

use std::path::{Path, PathBuf};

use super::{Modality, Settings};
use crate::error::{ConfigError, ConfigResult};

fn sorted_json_files(dir: &Path) -> ConfigResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| ConfigError::io(dir, e))?;
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// First `*.json` in the subject folder whose name carries the modality tag
/// and is not a structure file.
pub fn find_subject_config(subject_dir: &Path, modality: Modality) -> ConfigResult<PathBuf> {
    let missing = || ConfigError::SubjectConfigMissing {
        modality: modality.tag().to_string(),
    };
    if !subject_dir.is_dir() {
        return Err(missing());
    }
    sorted_json_files(subject_dir)?
        .into_iter()
        .find(|p| {
            let name = file_name(p);
            name.contains(modality.tag()) && !name.contains("structure")
        })
        .ok_or_else(missing)
}

/// Protocol name: last `-`-separated token of the config file stem.
pub fn protocol_of(subject_file: &Path) -> ConfigResult<String> {
    let stem = subject_file
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    match stem.rsplit_once('-') {
        Some((_, protocol)) if !protocol.is_empty() => Ok(protocol.to_string()),
        _ => Err(ConfigError::NoProtocol(file_name(subject_file))),
    }
}

pub fn find_structure_file(settings: &Settings, subject_file: &Path, modality: Modality) -> ConfigResult<PathBuf> {
    let protocol = protocol_of(subject_file)?;
    let dir = settings.structure_dir(&protocol);
    let missing = || ConfigError::StructureMissing {
        modality: modality.tag().to_string(),
        dir: dir.clone(),
    };
    if !dir.is_dir() {
        return Err(missing());
    }
    sorted_json_files(&dir)?
        .into_iter()
        .find(|p| {
            let name = file_name(p);
            name.contains(modality.tag()) && name.contains("structure")
        })
        .ok_or_else(missing)
}

/// Subject config and matching structure file: `(subject, structure)`.
pub fn prepare_config_files(
    settings: &Settings,
    subject_dir: &Path,
    modality: Modality,
) -> ConfigResult<(PathBuf, PathBuf)> {
    let subject = find_subject_config(subject_dir, modality)?;
    let structure = find_structure_file(settings, &subject, modality)?;
    Ok((subject, structure))
}

/// Create `$BCI_SCRIPTS/<subject>-<protocol>/` from the protocol's templates
/// and the matching recording folder. Returns the new subject folder.
pub fn create_subject(settings: &Settings, subject: &str, protocol: &str) -> ConfigResult<PathBuf> {
    let subject = subject.trim();
    if subject.is_empty() || subject.contains(['/', '\\']) {
        return Err(ConfigError::invalid("subject", format!("'{}' is not a valid folder name", subject)));
    }

    let template_dir = settings.template_dir(protocol);
    if !template_dir.is_dir() {
        return Err(ConfigError::io(
            &template_dir,
            std::io::Error::new(std::io::ErrorKind::NotFound, "protocol has no template_files folder"),
        ));
    }

    let subject_dir = settings.scripts.join(format!("{}-{}", subject, protocol));
    if subject_dir.exists() {
        return Err(ConfigError::SubjectExists(subject_dir));
    }
    std::fs::create_dir_all(&subject_dir).map_err(|e| ConfigError::io(&subject_dir, e))?;

    let entries = std::fs::read_dir(&template_dir).map_err(|e| ConfigError::io(&template_dir, e))?;
    for entry in entries.flatten() {
        let src = entry.path();
        if !src.is_file() {
            continue;
        }
        let dst = subject_dir.join(entry.file_name());
        std::fs::copy(&src, &dst).map_err(|e| ConfigError::io(&dst, e))?;
    }

    let record_dir = settings.record_dir(&subject_dir);
    std::fs::create_dir_all(&record_dir).map_err(|e| ConfigError::io(&record_dir, e))?;

    tracing::info!("Created subject folder {}", subject_dir.display());
    Ok(subject_dir)
}

/// Electrode names from `channelsList.txt`, one per line or whitespace-separated.
/// `Ok(None)` when the subject has no channel list yet.
pub fn read_channels(settings: &Settings, subject_dir: &Path) -> ConfigResult<Option<Vec<String>>> {
    let path = settings.channels_file(subject_dir);
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::io(&path, e))?;
    Ok(Some(text.split_whitespace().map(str::to_string).collect()))
}
