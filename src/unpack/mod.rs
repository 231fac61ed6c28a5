//! Archive expansion for downloaded zip, rar and 7z files.
//!
//! An archive `a/b/planos.zip` expands into the sibling directory
//! `a/b/planos/`. Members that are themselves archives are expanded the same
//! way, one level deeper, until the depth limit. The resulting
//! [`DecompressedNode`] tree lists every member ordered by name; an archive
//! node's `contenido` is the content of its expansion directory.
//!
//! Everything here is blocking and runs on the coordinator's blocking thread.

mod error;

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

pub use error::ArchiveError;

use crate::format;
use crate::model::{DecompressedNode, FalloDescompresion, FileItem, SectionDocument, relative_ruta};
use crate::settings::Settings;

/// Archive formats the expander handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Rar,
    SevenZ,
}

impl ArchiveKind {
    /// Kind of a file, judged by its name.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy();
        match format::label_from_file_name(&name)? {
            "ZIP" => Some(Self::Zip),
            "RAR" => Some(Self::Rar),
            "7Z" => Some(Self::SevenZ),
            _ => None,
        }
    }
}

/// Directory an archive expands into: its path with the extension stripped.
#[must_use]
pub fn target_dir(archive: &Path) -> PathBuf {
    let stem = archive
        .file_stem()
        .map_or_else(|| "contenido".into(), |s| s.to_string_lossy().into_owned());
    archive.with_file_name(stem)
}

/// One expanded top-level archive.
#[derive(Debug, Clone, PartialEq)]
pub struct Expansion {
    pub tree: DecompressedNode,
    /// Nested members that could not be expanded.
    pub failures: Vec<FalloDescompresion>,
}

/// Totals of one section pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpandStats {
    pub archives: usize,
    pub failures: usize,
}

/// Recursive archive expander.
#[derive(Debug, Clone)]
pub struct ArchiveExpander {
    max_depth: usize,
    unrar_binary: String,
    sevenzip_binary: String,
}

impl ArchiveExpander {
    #[must_use]
    pub fn new(
        max_depth: usize,
        unrar_binary: impl Into<String>,
        sevenzip_binary: impl Into<String>,
    ) -> Self {
        Self {
            max_depth: max_depth.max(1),
            unrar_binary: unrar_binary.into(),
            sevenzip_binary: sevenzip_binary.into(),
        }
    }

    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.max_archive_depth,
            settings.unrar_binary.clone(),
            settings.sevenzip_binary.clone(),
        )
    }

    /// Expands every downloaded archive of a section and rebuilds its tree.
    ///
    /// `fallos_descompresion` is recomputed; entries for members that are
    /// still missing on disk are kept, since archives already expanded are
    /// not extracted again. Conversion results already recorded on tree
    /// leaves are carried over by `ruta`.
    #[instrument(skip_all, fields(root = %project_root.display()))]
    pub fn expand_section(
        &self,
        section: &mut SectionDocument,
        project_root: &Path,
    ) -> ExpandStats {
        let mut stats = ExpandStats::default();
        let previous = std::mem::take(&mut section.fallos_descompresion);
        let mut failures = Vec::new();
        for documento in &mut section.documentos {
            self.expand_item(documento, project_root, &mut stats, &mut failures);
            for link in documento
                .anexos_detectados
                .iter_mut()
                .chain(documento.vinculados_detectados.iter_mut())
            {
                self.expand_item(link, project_root, &mut stats, &mut failures);
            }
        }
        let still_missing: Vec<FalloDescompresion> = previous
            .into_iter()
            .filter(|old| !old.ruta.is_empty() && !project_root.join(&old.ruta).exists())
            .filter(|old| !failures.iter().any(|new: &FalloDescompresion| new.ruta == old.ruta))
            .collect();
        failures.extend(still_missing);
        stats.failures = failures.len();
        section.fallos_descompresion = failures;
        info!(archives = stats.archives, failures = stats.failures, "archive expansion finished");
        stats
    }

    fn expand_item(
        &self,
        item: &mut dyn FileItem,
        project_root: &Path,
        stats: &mut ExpandStats,
        failures: &mut Vec<FalloDescompresion>,
    ) {
        let Some(ruta) = item.ruta().map(str::to_string) else {
            return;
        };
        let archive = project_root.join(&ruta);
        if ArchiveKind::from_path(&archive).is_none() || !archive.is_file() {
            return;
        }
        stats.archives += 1;
        match self.expand(&archive, project_root) {
            Ok(mut expansion) => {
                if let Some(previous) = item.descomprimidos_mut().as_ref() {
                    carry_over_conversions(previous, &mut expansion.tree);
                }
                *item.descomprimidos_mut() = Some(expansion.tree);
                failures.extend(expansion.failures);
            }
            Err(error) => {
                warn!(ruta = %ruta, error = %error, "archive expansion failed");
                failures.push(failure(&archive, project_root, &error));
            }
        }
    }

    /// Expands a top-level archive below `project_root`.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] when the archive itself cannot be expanded.
    /// Failures of nested members are reported in [`Expansion::failures`].
    pub fn expand(&self, archive: &Path, project_root: &Path) -> Result<Expansion, ArchiveError> {
        let mut failures = Vec::new();
        let tree = self.expand_at(archive, 1, project_root, &mut failures)?;
        Ok(Expansion { tree, failures })
    }

    fn expand_at(
        &self,
        archive: &Path,
        depth: usize,
        project_root: &Path,
        failures: &mut Vec<FalloDescompresion>,
    ) -> Result<DecompressedNode, ArchiveError> {
        if depth > self.max_depth {
            return Err(ArchiveError::RecursionLimit {
                path: archive.to_path_buf(),
                limit: self.max_depth,
            });
        }
        let kind = ArchiveKind::from_path(archive).ok_or_else(|| ArchiveError::Unsupported {
            path: archive.to_path_buf(),
        })?;
        let dest = target_dir(archive);
        if is_non_empty_dir(&dest) {
            debug!(dest = %dest.display(), "already expanded, rebuilding tree only");
        } else {
            std::fs::create_dir_all(&dest).map_err(|e| ArchiveError::io(&dest, e))?;
            match self.extract(kind, archive, &dest) {
                Ok(member_failures) => {
                    for (member, error) in member_failures {
                        warn!(
                            member = %member.display(),
                            error = %error,
                            "archive member not extracted"
                        );
                        failures.push(failure(&member, project_root, &error));
                    }
                }
                Err(error) => {
                    let _ = std::fs::remove_dir_all(&dest);
                    return Err(error);
                }
            }
            debug!(archive = %archive.display(), depth, "archive expanded");
        }
        let mut node = leaf_node(archive, project_root);
        node.contenido = Some(self.build_tree(&dest, depth, project_root, failures));
        Ok(node)
    }

    /// Lists `dir` as nodes. Archive members are expanded at `depth + 1`;
    /// their expansion directories are not listed separately.
    fn build_tree(
        &self,
        dir: &Path,
        depth: usize,
        project_root: &Path,
        failures: &mut Vec<FalloDescompresion>,
    ) -> Vec<DecompressedNode> {
        let entries: Vec<walkdir::DirEntry> = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .collect();
        let expansion_dirs: HashSet<PathBuf> = entries
            .iter()
            .filter(|e| e.file_type().is_file() && ArchiveKind::from_path(e.path()).is_some())
            .map(|e| target_dir(e.path()))
            .collect();

        let mut nodes = Vec::with_capacity(entries.len());
        for entry in entries {
            let path = entry.path();
            if entry.file_type().is_dir() {
                if expansion_dirs.contains(path) {
                    continue;
                }
                let mut folder = leaf_node(path, project_root);
                folder.formato = format::CARPETA.to_string();
                folder.contenido = Some(self.build_tree(path, depth, project_root, failures));
                nodes.push(folder);
            } else if ArchiveKind::from_path(path).is_some() {
                match self.expand_at(path, depth + 1, project_root, failures) {
                    Ok(node) => nodes.push(node),
                    Err(error) => {
                        warn!(
                            path = %path.display(),
                            error = %error,
                            "nested archive not expanded"
                        );
                        failures.push(failure(path, project_root, &error));
                        let mut node = leaf_node(path, project_root);
                        node.error = true;
                        nodes.push(node);
                    }
                }
            } else {
                nodes.push(leaf_node(path, project_root));
            }
        }
        nodes
    }

    /// Extracts `archive` into `dest`. Members that fail are returned with
    /// their error; only an unreadable archive is an `Err`.
    fn extract(
        &self,
        kind: ArchiveKind,
        archive: &Path,
        dest: &Path,
    ) -> Result<Vec<MemberFailure>, ArchiveError> {
        match kind {
            ArchiveKind::Zip => extract_zip(archive, dest),
            ArchiveKind::SevenZ => extract_sevenz(archive, dest),
            ArchiveKind::Rar => self.extract_rar(archive, dest).map(|()| Vec::new()),
        }
    }

    /// Library first, then the external `unrar`, then `7z`.
    fn extract_rar(&self, archive: &Path, dest: &Path) -> Result<(), ArchiveError> {
        let mut errors = Vec::new();
        match extract_rar_library(archive, dest) {
            Ok(()) => return Ok(()),
            Err(e) => errors.push(format!("unrar library: {e}")),
        }
        let dest_arg = format!("{}{}", dest.display(), std::path::MAIN_SEPARATOR);
        let attempts: [(&str, Vec<String>); 2] = [
            (
                &self.unrar_binary,
                vec![
                    "x".to_string(),
                    "-o+".to_string(),
                    "-y".to_string(),
                    archive.display().to_string(),
                    dest_arg,
                ],
            ),
            (
                &self.sevenzip_binary,
                vec![
                    "x".to_string(),
                    "-y".to_string(),
                    format!("-o{}", dest.display()),
                    archive.display().to_string(),
                ],
            ),
        ];
        for (program, args) in attempts {
            match run_extractor(program, &args) {
                Ok(()) => {
                    debug!(program, archive = %archive.display(), "rar extracted by external tool");
                    return Ok(());
                }
                Err(e) => errors.push(e),
            }
        }
        Err(ArchiveError::rar(archive, errors.join("; ")))
    }
}

/// Intended path of a member that could not be extracted, with its error.
type MemberFailure = (PathBuf, ArchiveError);

fn extract_zip(archive: &Path, dest: &Path) -> Result<Vec<MemberFailure>, ArchiveError> {
    let file = File::open(archive).map_err(|e| ArchiveError::io(archive, e))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| ArchiveError::zip(archive, e))?;
    let mut failed = Vec::new();
    for index in 0..zip.len() {
        let fallback = dest.join(
            zip.name_for_index(index)
                .map_or_else(|| format!("miembro_{index}"), sanitize_member_name),
        );
        let mut entry = match zip.by_index(index) {
            Ok(entry) => entry,
            Err(error) => {
                failed.push((fallback, ArchiveError::zip(archive, error)));
                continue;
            }
        };
        let Some(relative) = entry.enclosed_name() else {
            warn!(member = entry.name(), "skipping zip member with unsafe name");
            continue;
        };
        let out_path = dest.join(relative);
        let result = if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|e| ArchiveError::io(&out_path, e))
        } else {
            write_member(&mut entry, &out_path)
        };
        if let Err(error) = result {
            failed.push((out_path, error));
        }
    }
    Ok(failed)
}

fn extract_sevenz(archive: &Path, dest: &Path) -> Result<Vec<MemberFailure>, ArchiveError> {
    let mut failed = Vec::new();
    sevenz_rust::decompress_file_with_extract_fn(archive, dest, |entry, reader, out_path| {
        if !is_safe_relative(Path::new(entry.name())) {
            warn!(member = entry.name(), "skipping 7z member with unsafe name");
            return Ok(true);
        }
        let result = if entry.is_directory() {
            std::fs::create_dir_all(out_path).map_err(|e| ArchiveError::io(out_path, e))
        } else {
            write_member(reader, out_path)
        };
        if let Err(error) = result {
            failed.push((out_path.clone(), error));
        }
        Ok(true)
    })
    .map_err(|e| ArchiveError::sevenz(archive, e.to_string()))?;
    Ok(failed)
}

/// Streams one member to `out_path`, removing the partial file on failure.
fn write_member(reader: &mut dyn Read, out_path: &Path) -> Result<(), ArchiveError> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ArchiveError::io(parent, e))?;
    }
    let mut out = File::create(out_path).map_err(|e| ArchiveError::io(out_path, e))?;
    if let Err(source) = std::io::copy(reader, &mut out) {
        drop(out);
        let _ = std::fs::remove_file(out_path);
        return Err(ArchiveError::member(out_path, source));
    }
    Ok(())
}

fn is_safe_relative(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn sanitize_member_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map_or_else(|| "miembro".to_string(), |n| n.to_string_lossy().into_owned())
}

fn extract_rar_library(archive: &Path, dest: &Path) -> Result<(), unrar::error::UnrarError> {
    let mut open = unrar::Archive::new(archive).open_for_processing()?;
    while let Some(header) = open.read_header()? {
        let entry = header.entry();
        open = if entry.is_file() && is_safe_relative(&entry.filename) {
            header.extract_with_base(dest)?
        } else {
            header.skip()?
        };
    }
    Ok(())
}

fn run_extractor(program: &str, args: &[String]) -> Result<(), String> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| format!("{program}: {e}"))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(format!(
            "{program} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

fn is_non_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path).is_ok_and(|mut entries| entries.next().is_some())
}

fn leaf_node(path: &Path, project_root: &Path) -> DecompressedNode {
    let nombre = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    DecompressedNode {
        formato: format::label_from_file_name(&nombre)
            .unwrap_or(format::DESCONOCIDO)
            .to_string(),
        ruta: relative_ruta(project_root, path).unwrap_or_else(|| nombre.clone()),
        nombre,
        ..DecompressedNode::default()
    }
}

fn failure(path: &Path, project_root: &Path, error: &ArchiveError) -> FalloDescompresion {
    FalloDescompresion {
        archivo: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        ruta: relative_ruta(project_root, path).unwrap_or_default(),
        error: error.to_string(),
    }
}

/// Copies `conv` from leaves of a previous tree onto leaves with the same `ruta`.
fn carry_over_conversions(previous: &DecompressedNode, tree: &mut DecompressedNode) {
    let mut converted = HashMap::new();
    collect_conversions(previous, &mut converted);
    if converted.is_empty() {
        return;
    }
    tree.for_each_leaf_mut(&mut |leaf| {
        if let Some(conv) = converted.get(&leaf.ruta) {
            leaf.conv = Some(conv.clone());
        }
    });
}

fn collect_conversions(node: &DecompressedNode, out: &mut HashMap<String, String>) {
    if let Some(conv) = &node.conv {
        out.insert(node.ruta.clone(), conv.clone());
    }
    for child in node.contenido.iter().flatten() {
        collect_conversions(child, out);
    }
}
