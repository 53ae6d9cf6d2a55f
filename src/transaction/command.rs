//! Low-level mutation steps, each carrying enough state to be reversed

use crate::model::{
    Element, Folder, Model, ModelError, ModelResult, Relationship, View, ViewConnection,
    ViewObject,
};
use tracing::error;

/// One reversible step against the model
///
/// Removals carry the full removed record and replacements carry both
/// states, so every command's inverse can be built without looking at the
/// model again.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    InsertElement(Element),
    RemoveElement(Element),
    ReplaceElement { before: Element, after: Element },
    InsertRelationship(Relationship),
    RemoveRelationship(Relationship),
    ReplaceRelationship { before: Relationship, after: Relationship },
    InsertFolder(Folder),
    RemoveFolder(Folder),
    InsertView(View),
    RemoveView(View),
    ReplaceView { before: View, after: View },
    InsertObject(ViewObject),
    RemoveObject(ViewObject),
    ReplaceObject { before: ViewObject, after: ViewObject },
    InsertConnection(ViewConnection),
    RemoveConnection(ViewConnection),
    ReplaceConnection { before: ViewConnection, after: ViewConnection },
}

impl Command {
    /// Apply this step. Fails without side effects if the model is not in
    /// the state the step expects.
    pub fn apply(&self, model: &mut Model) -> ModelResult<()> {
        match self {
            Command::InsertElement(e) => model.insert_element(e.clone()),
            Command::RemoveElement(e) => model.remove_element(&e.id).map(|_| ()),
            Command::ReplaceElement { before, after } => {
                *model.element_mut(&before.id)? = after.clone();
                Ok(())
            }
            Command::InsertRelationship(r) => model.insert_relationship(r.clone()),
            Command::RemoveRelationship(r) => model.remove_relationship(&r.id).map(|_| ()),
            Command::ReplaceRelationship { before, after } => {
                *model.relationship_mut(&before.id)? = after.clone();
                Ok(())
            }
            Command::InsertFolder(f) => model.insert_folder(f.clone()),
            Command::RemoveFolder(f) => model.remove_folder(&f.id).map(|_| ()),
            Command::InsertView(v) => model.insert_view(v.clone()),
            Command::RemoveView(v) => model.remove_view(&v.id).map(|_| ()),
            Command::ReplaceView { before, after } => {
                *model.view_mut(&before.id)? = after.clone();
                Ok(())
            }
            Command::InsertObject(o) => model.insert_object(o.clone()),
            Command::RemoveObject(o) => model.remove_object(&o.id).map(|_| ()),
            Command::ReplaceObject { before, after } => {
                *model.object_mut(&before.id)? = after.clone();
                Ok(())
            }
            Command::InsertConnection(c) => model.insert_connection(c.clone()),
            Command::RemoveConnection(c) => model.remove_connection(&c.id).map(|_| ()),
            Command::ReplaceConnection { before, after } => {
                *model.connection_mut(&before.id)? = after.clone();
                Ok(())
            }
        }
    }

    /// The step that undoes this one
    pub fn inverse(&self) -> Command {
        match self {
            Command::InsertElement(e) => Command::RemoveElement(e.clone()),
            Command::RemoveElement(e) => Command::InsertElement(e.clone()),
            Command::ReplaceElement { before, after } => Command::ReplaceElement {
                before: after.clone(),
                after: before.clone(),
            },
            Command::InsertRelationship(r) => Command::RemoveRelationship(r.clone()),
            Command::RemoveRelationship(r) => Command::InsertRelationship(r.clone()),
            Command::ReplaceRelationship { before, after } => Command::ReplaceRelationship {
                before: after.clone(),
                after: before.clone(),
            },
            Command::InsertFolder(f) => Command::RemoveFolder(f.clone()),
            Command::RemoveFolder(f) => Command::InsertFolder(f.clone()),
            Command::InsertView(v) => Command::RemoveView(v.clone()),
            Command::RemoveView(v) => Command::InsertView(v.clone()),
            Command::ReplaceView { before, after } => Command::ReplaceView {
                before: after.clone(),
                after: before.clone(),
            },
            Command::InsertObject(o) => Command::RemoveObject(o.clone()),
            Command::RemoveObject(o) => Command::InsertObject(o.clone()),
            Command::ReplaceObject { before, after } => Command::ReplaceObject {
                before: after.clone(),
                after: before.clone(),
            },
            Command::InsertConnection(c) => Command::RemoveConnection(c.clone()),
            Command::RemoveConnection(c) => Command::InsertConnection(c.clone()),
            Command::ReplaceConnection { before, after } => Command::ReplaceConnection {
                before: after.clone(),
                after: before.clone(),
            },
        }
    }

    /// Short label for logs
    pub fn label(&self) -> &'static str {
        match self {
            Command::InsertElement(_) => "insert-element",
            Command::RemoveElement(_) => "remove-element",
            Command::ReplaceElement { .. } => "replace-element",
            Command::InsertRelationship(_) => "insert-relationship",
            Command::RemoveRelationship(_) => "remove-relationship",
            Command::ReplaceRelationship { .. } => "replace-relationship",
            Command::InsertFolder(_) => "insert-folder",
            Command::RemoveFolder(_) => "remove-folder",
            Command::InsertView(_) => "insert-view",
            Command::RemoveView(_) => "remove-view",
            Command::ReplaceView { .. } => "replace-view",
            Command::InsertObject(_) => "insert-object",
            Command::RemoveObject(_) => "remove-object",
            Command::ReplaceObject { .. } => "replace-object",
            Command::InsertConnection(_) => "insert-connection",
            Command::RemoveConnection(_) => "remove-connection",
            Command::ReplaceConnection { .. } => "replace-connection",
        }
    }
}

/// Apply `commands` in order. If one fails, the ones already applied are
/// reverted in reverse order and the failing step's index is returned with
/// the error.
pub fn apply_all(
    commands: &[Command],
    model: &mut Model,
) -> Result<(), (usize, ModelError)> {
    for (step, command) in commands.iter().enumerate() {
        if let Err(e) = command.apply(model) {
            revert_applied(&commands[..step], model);
            return Err((step, e));
        }
    }
    Ok(())
}

/// Undo `done` newest first. A step whose inverse fails is logged and
/// skipped; returns how many failed.
fn revert_applied(done: &[Command], model: &mut Model) -> usize {
    let mut failed = 0;
    for (step, command) in done.iter().enumerate().rev() {
        if let Err(e) = command.inverse().apply(model) {
            error!(step, command = command.label(), error = %e, "revert step failed; model may be inconsistent");
            failed += 1;
        }
    }
    failed
}

/// Revert `commands` (as previously applied) by running their inverses
/// backwards, with the same all-or-nothing behaviour as [`apply_all`].
pub fn revert_all(
    commands: &[Command],
    model: &mut Model,
) -> Result<(), (usize, ModelError)> {
    let inverses: Vec<Command> = commands.iter().rev().map(Command::inverse).collect();
    apply_all(&inverses, model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ElementType, FolderKind, Layer};

    fn actor(model: &Model, name: &str) -> Element {
        let folder = model
            .root_folder(FolderKind::Layer(Layer::Business))
            .unwrap()
            .id
            .clone();
        Element::new(ElementType::BusinessActor, name).in_folder(folder)
    }

    #[test]
    fn inverse_of_inverse_is_identity() {
        let model = Model::default();
        let e = actor(&model, "A");
        let cmd = Command::InsertElement(e);
        assert_eq!(cmd.inverse().inverse(), cmd);
    }

    #[test]
    fn failed_step_reverts_earlier_steps() {
        let mut model = Model::default();
        let a = actor(&model, "A");
        let commands = vec![
            Command::InsertElement(a.clone()),
            // inserting the same id twice fails
            Command::InsertElement(a.clone()),
        ];

        let (step, _) = apply_all(&commands, &mut model).unwrap_err();
        assert_eq!(step, 1);
        assert!(model.element(&a.id).is_none());
    }

    #[test]
    fn revert_keeps_going_past_a_failed_inverse() {
        let mut model = Model::default();
        let a = actor(&model, "A");
        let ghost = actor(&model, "Ghost");
        model.insert_element(a.clone()).unwrap();

        // the ghost was never inserted, so its inverse cannot apply
        let done = vec![
            Command::InsertElement(a.clone()),
            Command::InsertElement(ghost),
        ];
        assert_eq!(revert_applied(&done, &mut model), 1);
        assert!(model.element(&a.id).is_none());
    }

    #[test]
    fn replace_then_revert_restores_previous_state() {
        let mut model = Model::default();
        let a = actor(&model, "A");
        model.insert_element(a.clone()).unwrap();

        let mut renamed = a.clone();
        renamed.name = "B".into();
        let commands = vec![Command::ReplaceElement {
            before: a.clone(),
            after: renamed,
        }];
        apply_all(&commands, &mut model).unwrap();
        assert_eq!(model.element(&a.id).unwrap().name, "B");

        revert_all(&commands, &mut model).unwrap();
        assert_eq!(model.element(&a.id).unwrap().name, "A");
    }
}
