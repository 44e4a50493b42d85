//! Group markers in the macro collection
//!
//! A group is a marker macro followed directly by the macros it contains;
//! the marker stores how many of the following entries belong to it. Every
//! function here keeps that run-length in step with the collection order.

use crate::error::{EngineError, EngineResult};
use crate::macros::Macro;
use std::sync::Arc;
use tracing::error;

fn position(macros: &[Arc<Macro>], target: &Arc<Macro>) -> Option<usize> {
    macros.iter().position(|m| Arc::ptr_eq(m, target))
}

/// Insert `group` in front of `children`, moving them to follow it
///
/// Children keep the order they are given in. The group takes the position
/// of the earliest child.
pub(crate) fn create(
    macros: &mut Vec<Arc<Macro>>,
    group: Arc<Macro>,
    children: &[Arc<Macro>],
) -> EngineResult<()> {
    if children.is_empty() {
        return Err(EngineError::InvalidGroup(format!(
            "group {} has no members",
            group.name()
        )));
    }

    let mut first = macros.len();
    for (i, child) in children.iter().enumerate() {
        if children[..i].iter().any(|c| Arc::ptr_eq(c, child)) {
            return Err(EngineError::InvalidGroup(format!(
                "{} is listed more than once",
                child.name()
            )));
        }
        let index = position(macros, child).ok_or_else(|| EngineError::NotFound(child.name()))?;
        if child.is_group() || child.parent().is_some() {
            return Err(EngineError::InvalidGroup(format!(
                "{} already is or belongs to a group",
                child.name()
            )));
        }
        first = first.min(index);
    }

    let before = macros[..first]
        .iter()
        .filter(|m| !children.iter().any(|c| Arc::ptr_eq(m, c)))
        .count();
    macros.retain(|m| !children.iter().any(|c| Arc::ptr_eq(m, c)));

    for child in children {
        child.set_parent(Some(&group));
    }
    group.set_group_size(children.len());

    let run = std::iter::once(group).chain(children.iter().cloned());
    macros.splice(before..before, run);
    Ok(())
}

/// Erase the group marker, leaving its members in place without a parent
pub(crate) fn remove(macros: &mut Vec<Arc<Macro>>, group: &Arc<Macro>) -> EngineResult<()> {
    if !group.is_group() {
        return Err(EngineError::NotAGroup(group.name()));
    }
    let index = position(macros, group).ok_or_else(|| EngineError::NotFound(group.name()))?;
    let end = (index + 1 + group.group_size()).min(macros.len());
    for member in &macros[index + 1..end] {
        member.set_parent(None);
    }
    macros.remove(index);
    Ok(())
}

/// Members currently following `group`
pub(crate) fn members(macros: &[Arc<Macro>], group: &Arc<Macro>) -> Vec<Arc<Macro>> {
    match position(macros, group) {
        Some(index) => {
            let end = (index + 1 + group.group_size()).min(macros.len());
            macros[index + 1..end].to_vec()
        }
        None => Vec::new(),
    }
}

/// Move `item` into `group` (appending it) or out of its current group
pub(crate) fn move_to(
    macros: &mut Vec<Arc<Macro>>,
    item: &Arc<Macro>,
    group: Option<&Arc<Macro>>,
) -> EngineResult<()> {
    if item.is_group() {
        return Err(EngineError::InvalidGroup(format!(
            "cannot nest group {}",
            item.name()
        )));
    }
    if let Some(group) = group {
        if !group.is_group() {
            return Err(EngineError::NotAGroup(group.name()));
        }
        position(macros, group).ok_or_else(|| EngineError::NotFound(group.name()))?;
    }

    let old_group = item.parent();
    if old_group.is_none() && group.is_none() {
        return Ok(());
    }

    let index = position(macros, item).ok_or_else(|| EngineError::NotFound(item.name()))?;
    macros.remove(index);
    if let Some(old_group) = &old_group {
        old_group.adjust_group_size(false);
    }

    let insert_at = match (group, &old_group) {
        (Some(group), _) => {
            group.adjust_group_size(true);
            run_end(macros, group) - 1
        }
        (None, Some(old_group)) => run_end(macros, old_group),
        (None, None) => index,
    };
    macros.insert(insert_at.min(macros.len()), Arc::clone(item));
    item.set_parent(group);
    Ok(())
}

/// Index one past the last member of `group`
fn run_end(macros: &[Arc<Macro>], group: &Arc<Macro>) -> usize {
    position(macros, group)
        .map(|index| index + 1 + group.group_size())
        .unwrap_or(macros.len())
}

/// Assign parents after loading and drop inconsistent groups
///
/// A group marker inside another group's run is dropped. A group whose size
/// runs past the end of the collection is dropped together with the members
/// collected for it.
pub(crate) fn resolve(macros: Vec<Arc<Macro>>) -> Vec<Arc<Macro>> {
    let mut invalid: Vec<Arc<Macro>> = Vec::new();
    let mut current: Option<Arc<Macro>> = None;
    let mut collected: Vec<Arc<Macro>> = Vec::new();
    let mut remaining = 0;

    for m in &macros {
        if remaining > 0 && m.is_group() {
            error!(macro_name = %m.name(), "nested group detected - will delete");
            invalid.push(Arc::clone(m));
            continue;
        }
        if remaining > 0 {
            m.set_parent(current.as_ref());
            collected.push(Arc::clone(m));
            remaining -= 1;
        }
        if m.is_group() {
            remaining = m.group_size();
            current = Some(Arc::clone(m));
            collected.clear();
        }
    }

    if remaining > 0 {
        if let Some(group) = current {
            error!(macro_name = %group.name(), "invalid group size detected - will delete");
            invalid.push(group);
            invalid.append(&mut collected);
        }
    }

    macros
        .into_iter()
        .filter(|m| !invalid.iter().any(|bad| Arc::ptr_eq(m, bad)))
        .collect()
}
