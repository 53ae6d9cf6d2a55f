//! Changes: the requested mutations and their validation

mod types;
mod validate;

pub use types::{
    AddConnectionToView, AddToView, Change, ChangeKind, CreateElement, CreateFolder, CreateGroup,
    CreateNote, CreateRelationship, CreateView, DeleteConnectionFromView, DeleteElement,
    DeleteRelationship, DeleteView, DuplicateView, LayoutView, MoveToFolder, MoveViewObject,
    Placement, PropertyMap, RefTarget, Reference, SetProperty, SetViewRouter, StyleConnection,
    StyleViewObject, UpdateElement, UpdateRelationship,
};
pub use validate::{
    BatchContext, ChangeValidator, ValidationError, ValidationErrorKind, ACCESS_TYPES,
};
