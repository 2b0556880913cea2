//! Deployment-step building: materializing queued templates as deployable
//! bundles paired with rollback targets.
//!
//! Each step's bundle is a full copy of the previous step's bundle with the
//! changed stack fragments overwritten, so untouched resources are carried
//! through unchanged. Bundles are addressed remotely by a SHA-256 content
//! hash. Rollback targets are LIFO: step 0 rolls back to the currently-live
//! bundle, every later step rolls back to the deployment one step earlier.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{BuildError, Result, TablestepError};

use super::steps::TemplateState;

/// File name of the root template inside a bundle.
const ROOT_TEMPLATE_FILE: &str = "root.json";

/// Directory holding nested stack fragments inside a bundle.
const STACKS_DIR: &str = "stacks";

/// Parameter key carrying the step's bundle prefix into the stack update.
const BUNDLE_KEY_PARAMETER: &str = "deploymentBundleKey";

/// One provider-side stack update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentOp {
    /// Stack the update targets.
    pub stack_name: String,
    /// Remote key of the bundle's root template.
    pub template_location: String,
    /// Stack parameters for the update.
    pub parameters: BTreeMap<String, String>,
    /// Identifiers of tables this update touches.
    pub table_names: Vec<String>,
}

impl DeploymentOp {
    /// Returns the remote prefix the op's bundle lives under.
    #[must_use]
    pub fn bundle_prefix(&self) -> &str {
        self.template_location
            .strip_suffix(&format!("/{ROOT_TEMPLATE_FILE}"))
            .unwrap_or(&self.template_location)
    }
}

/// One forward deployment operation paired with its rollback target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStep {
    /// The forward stack update.
    pub deployment: DeploymentOp,
    /// The update that returns to the previous good state.
    pub rollback: DeploymentOp,
    /// Local directory holding this step's bundle.
    pub bundle_dir: PathBuf,
}

/// Deterministic content hashing for bundle directories.
#[derive(Debug, Default)]
pub struct BundleHasher;

impl BundleHasher {
    /// Creates a new bundle hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of every file under a directory.
    ///
    /// Files are visited in sorted relative-path order so the hash is stable
    /// across platforms and runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn hash_dir(&self, dir: &Path) -> Result<String> {
        let mut files = Vec::new();
        collect_files(dir, dir, &mut files)?;
        files.sort();

        let mut hasher = Sha256::new();
        for relative in &files {
            hasher.update(relative.to_string_lossy().as_bytes());
            let bytes = fs::read(dir.join(relative))?;
            hasher.update(&bytes);
        }

        Ok(hex::encode(hasher.finalize()))
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}

/// Builder that turns a drained [`TemplateState`] into ordered deployment
/// steps.
#[derive(Debug)]
pub struct StepBuilder {
    /// Queued intermediate templates, consumed destructively.
    state: TemplateState,
    /// Directory of the currently-deployed bundle.
    live_bundle: PathBuf,
    /// Directory step bundles are created under.
    work_dir: PathBuf,
    /// Root stack every update goes through.
    root_stack_name: String,
    /// Base stack parameters, merged into every step.
    parameters: BTreeMap<String, String>,
    /// Content hash of the backend build.
    build_hash: String,
    /// Live table ARNs by logical table name.
    table_arns: BTreeMap<String, String>,
    /// Bundle hasher.
    hasher: BundleHasher,
}

impl StepBuilder {
    /// Creates a step builder.
    #[must_use]
    pub fn new(
        state: TemplateState,
        live_bundle: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        root_stack_name: &str,
        build_hash: &str,
    ) -> Self {
        Self {
            state,
            live_bundle: live_bundle.into(),
            work_dir: work_dir.into(),
            root_stack_name: root_stack_name.to_string(),
            parameters: BTreeMap::new(),
            build_hash: build_hash.to_string(),
            table_arns: BTreeMap::new(),
            hasher: BundleHasher::new(),
        }
    }

    /// Sets the base stack parameters merged into every step.
    #[must_use]
    pub fn with_parameters(mut self, parameters: BTreeMap<String, String>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Sets the live table ARN for a logical table name.
    #[must_use]
    pub fn with_table_arn(mut self, table_name: &str, arn: &str) -> Self {
        self.table_arns
            .insert(table_name.to_string(), arn.to_string());
        self
    }

    /// Builds the ordered list of deployment steps.
    ///
    /// Each round copies the previous step's bundle forward, pops the oldest
    /// queued template for every stack that still has one, and overwrites
    /// those fragments in the new bundle.
    ///
    /// # Errors
    ///
    /// Fails fast with a [`BuildError`] if the live bundle or backend build
    /// is missing; there is nothing safe to copy forward from.
    pub fn build(&mut self) -> Result<Vec<DeploymentStep>> {
        if !self.live_bundle.is_dir() {
            return Err(TablestepError::Build(BuildError::MissingLiveBundle {
                path: self.live_bundle.clone(),
            }));
        }

        if self.build_hash.trim().is_empty() {
            return Err(TablestepError::Build(BuildError::MissingBackendBuild));
        }

        let mut steps: Vec<DeploymentStep> = Vec::new();
        let mut previous_dir = self.live_bundle.clone();
        let mut previous_op = self.live_op()?;
        let mut all_tables: Vec<String> = Vec::new();
        let mut round = 0_usize;

        while self.state.has_pending() {
            let step_dir = self.work_dir.join(format!("step-{round}"));
            copy_dir(&previous_dir, &step_dir)?;

            let mut affected_tables = Vec::new();
            for stack_name in self.state.pending_stacks() {
                let Some(template) = self.state.pop(&stack_name) else {
                    continue;
                };

                for table in template.table_resource_names() {
                    let identifier = self
                        .table_arns
                        .get(table)
                        .cloned()
                        .unwrap_or_else(|| table.to_string());
                    if !affected_tables.contains(&identifier) {
                        affected_tables.push(identifier);
                    }
                }

                write_fragment(&step_dir, &stack_name, &template)?;
            }

            for table in &affected_tables {
                if !all_tables.contains(table) {
                    all_tables.push(table.clone());
                }
            }

            let bundle_hash = self.hasher.hash_dir(&step_dir)?;
            let prefix = format!(
                "deployments/{}/step-{round}-{}",
                self.build_hash,
                BundleHasher::short_hash(&bundle_hash)
            );

            let mut parameters = self.parameters.clone();
            parameters.insert(BUNDLE_KEY_PARAMETER.to_string(), prefix.clone());

            let deployment = DeploymentOp {
                stack_name: self.root_stack_name.clone(),
                template_location: format!("{prefix}/{ROOT_TEMPLATE_FILE}"),
                parameters,
                table_names: affected_tables,
            };

            debug!(
                "Built step {round}: {} ({} table(s))",
                deployment.template_location,
                deployment.table_names.len()
            );

            steps.push(DeploymentStep {
                deployment: deployment.clone(),
                rollback: previous_op,
                bundle_dir: step_dir.clone(),
            });

            previous_op = deployment;
            previous_dir = step_dir;
            round += 1;
        }

        // The synthesized return-to-live op covers every table the plan
        // touches.
        if let Some(first) = steps.first_mut() {
            first.rollback.table_names = all_tables;
        }

        info!("Built {} deployment step(s)", steps.len());
        Ok(steps)
    }

    /// Synthesizes the "return to currently-deployed state" op.
    fn live_op(&self) -> Result<DeploymentOp> {
        let live_hash = self.hasher.hash_dir(&self.live_bundle)?;
        let prefix = format!(
            "deployments/{}/live-{}",
            self.build_hash,
            BundleHasher::short_hash(&live_hash)
        );

        let mut parameters = self.parameters.clone();
        parameters.insert(BUNDLE_KEY_PARAMETER.to_string(), prefix.clone());

        Ok(DeploymentOp {
            stack_name: self.root_stack_name.clone(),
            template_location: format!("{prefix}/{ROOT_TEMPLATE_FILE}"),
            parameters,
            table_names: Vec::new(),
        })
    }
}

/// Writes one stack fragment into a bundle directory.
fn write_fragment(
    bundle_dir: &Path,
    stack_name: &str,
    template: &crate::snapshot::StackTemplate,
) -> Result<()> {
    let stacks_dir = bundle_dir.join(STACKS_DIR);
    fs::create_dir_all(&stacks_dir).map_err(|e| bundle_write(&stacks_dir, &e))?;

    let path = stacks_dir.join(format!("{stack_name}.json"));
    let content = serde_json::to_string_pretty(template)
        .map_err(|e| TablestepError::internal(format!("template serialization failed: {e}")))?;
    fs::write(&path, content).map_err(|e| bundle_write(&path, &e))?;

    Ok(())
}

/// Recursively copies a bundle directory.
fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to).map_err(|e| bundle_write(to, &e))?;

    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| bundle_write(&target, &e))?;
        }
    }

    Ok(())
}

/// Collects relative file paths under a directory.
fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            collect_files(root, &entry.path(), out)?;
        } else if let Ok(relative) = entry.path().strip_prefix(root) {
            out.push(relative.to_path_buf());
        }
    }
    Ok(())
}

fn bundle_write(path: &Path, error: &std::io::Error) -> TablestepError {
    TablestepError::Build(BuildError::BundleWrite {
        path: path.to_path_buf(),
        message: error.to_string(),
    })
}
