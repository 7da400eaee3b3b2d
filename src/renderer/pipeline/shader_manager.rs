//! Shader Template Library
//!
//! Every GPU program is a minijinja template under `src/renderer/shaders`.
//! Turning one into a [`CompiledProgram`] takes three steps:
//!
//! | Step      | Where          | Failure                          |
//! |-----------|----------------|----------------------------------|
//! | expand    | worker thread  | [`ShaderError::NotFound`] / [`ShaderError::Template`] |
//! | validate  | worker thread  | [`ShaderError::Parse`] / [`ShaderError::Validation`]  |
//! | create    | caller thread  | [`ShaderError::Device`]          |
//!
//! Validation runs through naga before the source reaches
//! `create_shader_module`, so most broken shaders surface as a `Result`
//! without touching the device. Module creation itself runs inside an error
//! scope ([`checked`]) for what only the backend can reject. Modules are
//! deduplicated by the xxh3-128 hash of their final source.
//!
//! Templates resolve in this order: in-memory sources registered with
//! [`ShaderLibrary::set_source`], then (debug builds only) the files on disk,
//! then the embedded copy. The first two are what make
//! [`ShaderLibrary::reload`] useful while iterating on a shader.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

use minijinja::{Environment, Error, ErrorKind, syntax::SyntaxConfig};
use parking_lot::RwLock;
use rust_embed::RustEmbed;
use rustc_hash::FxHashMap;
use xxhash_rust::xxh3::xxh3_128;

use super::checked;
use crate::errors::ShaderError;

#[derive(RustEmbed)]
#[folder = "src/renderer/shaders"]
struct ShaderAssets;

#[cfg(debug_assertions)]
const SHADER_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/src/renderer/shaders");

/// Template name → source, consulted before disk and the embedded copy.
type SourceOverrides = Arc<RwLock<FxHashMap<String, String>>>;

fn build_env(overrides: SourceOverrides) -> Result<Environment<'static>, Error> {
    let mut env = Environment::new();

    let syntax = SyntaxConfig::builder()
        .block_delimiters("{$", "$}")
        .variable_delimiters("{{", "}}")
        .line_statement_prefix("$$")
        .build()?;

    env.set_syntax(syntax);
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);
    env.set_loader(move |name| {
        if let Some(source) = overrides.read().get(name) {
            return Ok(Some(source.clone()));
        }
        shader_loader(name)
    });
    env.set_path_join_callback(|name, _parent| format!("chunks/{name}").into());
    Ok(env)
}

fn shader_loader(name: &str) -> Result<Option<String>, Error> {
    let filename = if std::path::Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wgsl"))
    {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("{name}.wgsl"))
    };

    #[cfg(debug_assertions)]
    {
        let path = std::path::Path::new(SHADER_DIR).join(filename.as_ref());
        if path.exists() {
            return std::fs::read_to_string(&path).map(Some).map_err(|e| {
                Error::new(
                    ErrorKind::TemplateNotFound,
                    format!("Failed to read {}: {e}", path.display()),
                )
            });
        }
    }

    if let Some(file) = ShaderAssets::get(&filename)
        && let Ok(source) = std::str::from_utf8(file.data.as_ref())
    {
        return Ok(Some(source.to_string()));
    }

    Ok(None)
}

// ============================================================================
// Programs
// ============================================================================

/// Expanded and validated WGSL, not yet handed to a device.
#[derive(Debug, Clone)]
pub struct PreparedShader {
    pub name: String,
    pub source: String,
    pub hash: u128,
}

/// A validated GPU module ready for pipeline creation.
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub name: String,
    pub hash: u128,
    pub module: wgpu::ShaderModule,
}

/// Outcome of compiling a batch of programs, looked up by name.
#[derive(Debug, Default)]
pub struct ProgramSet {
    programs: FxHashMap<&'static str, Result<CompiledProgram, ShaderError>>,
}

impl ProgramSet {
    pub fn get(&self, name: &str) -> Result<&CompiledProgram, ShaderError> {
        match self.programs.get(name) {
            Some(Ok(program)) => Ok(program),
            Some(Err(err)) => Err(err.clone()),
            None => Err(ShaderError::NotFound(name.to_string())),
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &ShaderError> {
        self.programs.values().filter_map(|r| r.as_ref().err())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

/// Template constants shared by every program.
pub type ShaderDefines = BTreeMap<&'static str, minijinja::Value>;

// ============================================================================
// ShaderLibrary
// ============================================================================

pub struct ShaderLibrary {
    env: Environment<'static>,
    overrides: SourceOverrides,
    defines: ShaderDefines,
    /// xxh3-128 of final WGSL → module.
    module_cache: FxHashMap<u128, wgpu::ShaderModule>,
}

impl ShaderLibrary {
    #[must_use]
    pub fn new(defines: ShaderDefines) -> Self {
        let overrides = SourceOverrides::default();
        let env = build_env(overrides.clone()).expect("Failed to configure shader template syntax");
        Self {
            env,
            overrides,
            defines,
            module_cache: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn defines(&self) -> &ShaderDefines {
        &self.defines
    }

    /// Replaces the template `name` (a program, or `chunks/<chunk>` for an
    /// include) with `source`; `None` goes back to the file. Takes effect on
    /// the next expansion.
    pub fn set_source(&mut self, name: &str, source: Option<String>) {
        let mut overrides = self.overrides.write();
        match source {
            Some(source) => {
                overrides.insert(name.to_string(), source);
            }
            None => {
                overrides.remove(name);
            }
        }
        drop(overrides);
        self.env.clear_templates();
    }

    /// Runs the template engine over `name` and its includes.
    pub fn expand(&self, name: &str) -> Result<String, ShaderError> {
        let template = self.env.get_template(name).map_err(|e| match e.kind() {
            ErrorKind::TemplateNotFound => ShaderError::NotFound(name.to_string()),
            _ => ShaderError::Template {
                name: name.to_string(),
                message: format!("{e:#}"),
            },
        })?;

        let source = template
            .render(minijinja::Value::from_serialize(&self.defines))
            .map_err(|e| match e.kind() {
                ErrorKind::TemplateNotFound => ShaderError::NotFound(format!("{name}: {e}")),
                _ => ShaderError::Template {
                    name: name.to_string(),
                    message: format!("{e:#}"),
                },
            })?;

        Ok(format!("// === Generated: {name} ===\n{source}"))
    }

    /// Expands and validates without touching the device. Thread-safe.
    pub fn prepare(&self, name: &str) -> Result<PreparedShader, ShaderError> {
        let source = self.expand(name)?;
        validate_wgsl(name, &source)?;
        Ok(PreparedShader {
            name: name.to_string(),
            hash: xxh3_128(source.as_bytes()),
            source,
        })
    }

    /// Expands and validates `names` on a bounded worker pool. Results keep
    /// the order of `names`.
    pub fn prepare_all<'a>(
        &self,
        names: &[&'a str],
    ) -> Vec<(&'a str, Result<PreparedShader, ShaderError>)> {
        let workers = std::thread::available_parallelism()
            .map_or(1, std::num::NonZeroUsize::get)
            .min(names.len())
            .max(1);

        let (job_tx, job_rx) = flume::unbounded::<(usize, &'a str)>();
        let (out_tx, out_rx) = flume::unbounded();
        for job in names.iter().copied().enumerate() {
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let out_tx = out_tx.clone();
                scope.spawn(move || {
                    for (index, name) in job_rx.iter() {
                        let _ = out_tx.send((index, name, self.prepare(name)));
                    }
                });
            }
        });
        drop(out_tx);

        let mut results: Vec<_> = out_rx.try_iter().collect();
        results.sort_by_key(|(index, _, _)| *index);
        results
            .into_iter()
            .map(|(_, name, result)| (name, result))
            .collect()
    }

    /// Creates (or reuses) the module for already validated source. Only
    /// modules the device accepted are cached.
    pub fn create(
        &mut self,
        device: &wgpu::Device,
        prepared: PreparedShader,
    ) -> Result<CompiledProgram, ShaderError> {
        let PreparedShader { name, source, hash } = prepared;
        if let Some(module) = self.module_cache.get(&hash) {
            return Ok(CompiledProgram {
                name,
                hash,
                module: module.clone(),
            });
        }

        log::debug!("create shader module '{name}' ({hash:032x})");
        let module = checked(device, &name, || {
            Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&format!("Shader Module {name}")),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            }))
        })?;
        self.module_cache.insert(hash, module.clone());
        Ok(CompiledProgram { name, hash, module })
    }

    /// Single-program convenience over [`prepare`](Self::prepare) and
    /// [`create`](Self::create).
    pub fn compile(
        &mut self,
        device: &wgpu::Device,
        name: &str,
    ) -> Result<CompiledProgram, ShaderError> {
        let prepared = self.prepare(name)?;
        self.create(device, prepared)
    }

    /// Compiles every program in `names` in parallel.
    pub fn compile_all(&mut self, device: &wgpu::Device, names: &[&'static str]) -> ProgramSet {
        let programs = self
            .prepare_all(names)
            .into_iter()
            .map(|(name, prepared)| (name, prepared.and_then(|p| self.create(device, p))))
            .collect();
        ProgramSet { programs }
    }

    /// Drops cached templates so the next expansion re-reads them (and picks
    /// up any source set with [`set_source`](Self::set_source)).
    pub fn reload(&mut self) {
        self.env.clear_templates();
    }

    #[must_use]
    pub fn cached_module_count(&self) -> usize {
        self.module_cache.len()
    }
}

/// Parses and validates WGSL with naga, rendering diagnostics against the
/// source on failure.
pub fn validate_wgsl(name: &str, source: &str) -> Result<naga::Module, ShaderError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| ShaderError::Parse {
        name: name.to_string(),
        message: e.emit_to_string(source),
    })?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| ShaderError::Validation {
        name: name.to_string(),
        message: e.emit_to_string(source),
    })?;

    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_errors_become_parse_errors() {
        let err = validate_wgsl("broken", "fn main( {").unwrap_err();
        assert!(matches!(err, ShaderError::Parse { .. }), "{err:?}");
        assert_eq!(err.program(), "broken");
    }

    #[test]
    fn type_errors_become_validation_errors() {
        let source = "fn f() -> f32 { return 1u; }";
        let err = validate_wgsl("typed", source).unwrap_err();
        assert!(
            matches!(err, ShaderError::Parse { .. } | ShaderError::Validation { .. }),
            "{err:?}"
        );
    }

    #[test]
    fn source_override_replaces_and_restores_template() {
        let mut library = ShaderLibrary::new(ShaderDefines::new());
        let original = library.expand("blit").unwrap();

        library.set_source("blit", Some("// replaced".to_string()));
        let replaced = library.expand("blit").unwrap();
        assert!(replaced.ends_with("// replaced"), "{replaced}");

        library.set_source("blit", None);
        assert_eq!(library.expand("blit").unwrap(), original);
    }

    #[test]
    fn overridden_program_still_resolves_includes() {
        let mut library = ShaderLibrary::new(ShaderDefines::new());
        library.set_source(
            "fullscreen_only",
            Some("{$ include \"fullscreen\" $}\n".to_string()),
        );
        let prepared = library.prepare("fullscreen_only").unwrap();
        assert!(prepared.source.contains("fn vs_fullscreen"));
    }

    #[test]
    fn invalid_override_fails_before_the_device() {
        let mut library = ShaderLibrary::new(ShaderDefines::new());
        library.set_source("tonemap", Some("fn fs_main( {".to_string()));
        let err = library.prepare("tonemap").unwrap_err();
        assert!(matches!(err, ShaderError::Parse { .. }), "{err:?}");
        assert_eq!(err.program(), "tonemap");
    }

    #[test]
    fn unknown_template_is_not_found() {
        let library = ShaderLibrary::new(ShaderDefines::new());
        let err = library.expand("does_not_exist").unwrap_err();
        assert_eq!(err, ShaderError::NotFound("does_not_exist".to_string()));
    }
}
