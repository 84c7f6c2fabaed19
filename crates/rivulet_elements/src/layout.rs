//! Layout containers. Elements created while the returned guard is alive
//! land inside the container.

use rivulet_proto::BlockKind;
use rivulet_runtime::{context, ContainerGuard, ScriptError};

pub fn vertical() -> Result<ContainerGuard, ScriptError> {
    context::current()?.open_container(BlockKind::Vertical)
}

pub fn horizontal() -> Result<ContainerGuard, ScriptError> {
    context::current()?.open_container(BlockKind::Horizontal)
}

/// A form groups its widgets' mutations until submit. Form ids must be
/// unique within a run.
pub fn form(form_id: impl Into<String>) -> Result<ContainerGuard, ScriptError> {
    context::current()?.open_container(BlockKind::Form {
        form_id: form_id.into(),
    })
}
