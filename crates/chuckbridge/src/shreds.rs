//! Shred lifecycle: spawn, replace, remove, clear and inspect.
//!
//! These mutate tables a realtime thread would also read, so they live on
//! [`Bridge`] only and are unreachable while a
//! [`RealtimeSession`](crate::RealtimeSession) owns it.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::bridge::Bridge;
use crate::config::Param;
use crate::engine::{CompileResult, Engine, ShredHandle, ShredId};
use crate::error::{BridgeError, Result};

impl<E: Engine> Bridge<E> {
    /// Compile `code` and spawn `count` shreds from it.
    ///
    /// `args` is a `:`-separated argument list. With `immediate` the new
    /// shreds start executing before this returns. Malformed code yields an
    /// unsuccessful [`CompileResult`] rather than an error.
    ///
    /// Spawning is all-or-nothing: if the engine spawns fewer than `count`
    /// shreds, the ones it did spawn are removed and the compile fails.
    pub fn compile(
        &mut self,
        code: &str,
        args: &str,
        count: usize,
        immediate: bool,
    ) -> Result<CompileResult> {
        self.ready()?;
        check_count(count)?;
        let result = self.engine.compile_code(code, args, count, immediate);
        Ok(self.settle(result, "inline", count))
    }

    /// Compile a source file and spawn `count` shreds from it.
    ///
    /// Relative paths resolve against the configured working directory.
    pub fn compile_file(
        &mut self,
        path: impl AsRef<Path>,
        args: &str,
        count: usize,
        immediate: bool,
    ) -> Result<CompileResult> {
        self.ready()?;
        check_count(count)?;
        let path = self.resolve_path(path.as_ref());
        let result = self.engine.compile_file(&path, args, count, immediate);
        Ok(self.settle(result, &path.to_string_lossy(), count))
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match self.config().working_directory {
            Some(dir) => dir.join(path),
            None => path.to_path_buf(),
        }
    }

    fn settle(&mut self, result: CompileResult, source: &str, count: usize) -> CompileResult {
        if !result.success {
            log::debug!("Compilation of {} failed", source);
            // Anything the engine spawned before failing is not reported back.
            for id in &result.ids {
                self.engine.remove_shred(*id);
            }
            return CompileResult::failed();
        }
        if result.ids.len() != count {
            log::warn!(
                "Engine spawned {} of {} shreds from {}; rolling back",
                result.ids.len(),
                count,
                source
            );
            for id in &result.ids {
                self.engine.remove_shred(*id);
            }
            return CompileResult::failed();
        }
        log::debug!("Spawned shreds {:?} from {}", result.ids, source);
        result
    }

    /// Remove a shred. Unknown or finished ids are a silent no-op.
    pub fn remove(&mut self, id: ShredId) -> Result<()> {
        self.ready()?;
        if id.is_none() || !self.engine.all_shred_ids().contains(&id) {
            log::trace!("Ignoring removal of unknown shred {}", id);
            return Ok(());
        }
        log::debug!("Removing shred {}", id);
        self.engine.remove_shred(id);
        Ok(())
    }

    /// Swap the code of a running shred.
    ///
    /// Returns the id of the replacement, or [`ShredId::NONE`] when the code
    /// does not compile or `id` is not live.
    pub fn replace(&mut self, id: ShredId, code: &str, args: &str) -> Result<ShredId> {
        self.ready()?;
        let new_id = self.engine.replace_shred(id, code, args);
        if new_id.is_none() {
            log::warn!("Could not replace shred {}", id);
        } else {
            log::debug!("Replaced shred {} with {}", id, new_id);
        }
        Ok(new_id)
    }

    /// Remove every shred.
    pub fn clear(&mut self) -> Result<()> {
        self.ready()?;
        log::debug!("Clearing VM");
        self.engine.clear_vm();
        Ok(())
    }

    /// Reset the id generator for future spawns. Live ids are unaffected.
    pub fn reset_id_counter(&mut self) -> Result<()> {
        self.ready()?;
        self.engine.reset_shred_id();
        Ok(())
    }

    pub fn list_ids(&self) -> Result<BTreeSet<ShredId>> {
        self.ready()?;
        Ok(self.engine.all_shred_ids())
    }

    pub fn info(&self, id: ShredId) -> Result<Option<ShredHandle>> {
        self.ready()?;
        Ok(self.engine.shred_info(id))
    }

    /// Snapshots of every live shred, in id order.
    pub fn shreds(&self) -> Result<Vec<ShredHandle>> {
        Ok(self
            .list_ids()?
            .into_iter()
            .filter_map(|id| self.engine.shred_info(id))
            .collect())
    }

    /// The configured working directory, if any.
    pub fn working_directory(&self) -> Option<PathBuf> {
        self.param(Param::WorkingDirectory)
            .and_then(|v| v.as_str().map(PathBuf::from))
            .filter(|p| !p.as_os_str().is_empty())
    }
}

fn check_count(count: usize) -> Result<()> {
    if count == 0 {
        return Err(BridgeError::InvalidArgument(
            "shred count must be at least 1".to_string(),
        ));
    }
    Ok(())
}
