//! Closed type vocabulary for elements and relationships
//!
//! Type names on the wire are kebab-case (`business-actor`,
//! `serving-relationship`). Anything outside this table is rejected.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Model layer; decides which root folder a new concept is filed into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Strategy,
    Business,
    Application,
    Technology,
    Physical,
    Motivation,
    Implementation,
    Relations,
    Other,
}

impl Layer {
    pub const ALL: [Layer; 9] = [
        Layer::Strategy,
        Layer::Business,
        Layer::Application,
        Layer::Technology,
        Layer::Physical,
        Layer::Motivation,
        Layer::Implementation,
        Layer::Relations,
        Layer::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Strategy => "strategy",
            Layer::Business => "business",
            Layer::Application => "application",
            Layer::Technology => "technology",
            Layer::Physical => "physical",
            Layer::Motivation => "motivation",
            Layer::Implementation => "implementation",
            Layer::Relations => "relations",
            Layer::Other => "other",
        }
    }
}

impl FromStr for Layer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Layer::ALL
            .iter()
            .find(|l| l.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown layer: {}", s))
    }
}

macro_rules! vocabulary {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => ($wire:literal, $layer:ident)),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Wire name of this type
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }

            /// Layer this type belongs to
            pub fn layer(&self) -> Layer {
                match self {
                    $($name::$variant => Layer::$layer),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    other => Err(format!("unknown {}: '{}'", stringify!($name), other)),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

vocabulary!(
    /// Element (node) types
    ElementType {
        Resource => ("resource", Strategy),
        Capability => ("capability", Strategy),
        ValueStream => ("value-stream", Strategy),
        CourseOfAction => ("course-of-action", Strategy),

        BusinessActor => ("business-actor", Business),
        BusinessRole => ("business-role", Business),
        BusinessCollaboration => ("business-collaboration", Business),
        BusinessInterface => ("business-interface", Business),
        BusinessProcess => ("business-process", Business),
        BusinessFunction => ("business-function", Business),
        BusinessInteraction => ("business-interaction", Business),
        BusinessEvent => ("business-event", Business),
        BusinessService => ("business-service", Business),
        BusinessObject => ("business-object", Business),
        Contract => ("contract", Business),
        Representation => ("representation", Business),
        Product => ("product", Business),

        ApplicationComponent => ("application-component", Application),
        ApplicationCollaboration => ("application-collaboration", Application),
        ApplicationInterface => ("application-interface", Application),
        ApplicationFunction => ("application-function", Application),
        ApplicationInteraction => ("application-interaction", Application),
        ApplicationProcess => ("application-process", Application),
        ApplicationEvent => ("application-event", Application),
        ApplicationService => ("application-service", Application),
        DataObject => ("data-object", Application),

        Node => ("node", Technology),
        Device => ("device", Technology),
        SystemSoftware => ("system-software", Technology),
        TechnologyCollaboration => ("technology-collaboration", Technology),
        TechnologyInterface => ("technology-interface", Technology),
        Path => ("path", Technology),
        CommunicationNetwork => ("communication-network", Technology),
        TechnologyFunction => ("technology-function", Technology),
        TechnologyProcess => ("technology-process", Technology),
        TechnologyInteraction => ("technology-interaction", Technology),
        TechnologyEvent => ("technology-event", Technology),
        TechnologyService => ("technology-service", Technology),
        Artifact => ("artifact", Technology),

        Equipment => ("equipment", Physical),
        Facility => ("facility", Physical),
        DistributionNetwork => ("distribution-network", Physical),
        Material => ("material", Physical),

        Stakeholder => ("stakeholder", Motivation),
        Driver => ("driver", Motivation),
        Assessment => ("assessment", Motivation),
        Goal => ("goal", Motivation),
        Outcome => ("outcome", Motivation),
        Principle => ("principle", Motivation),
        Requirement => ("requirement", Motivation),
        Constraint => ("constraint", Motivation),
        Meaning => ("meaning", Motivation),
        Value => ("value", Motivation),

        WorkPackage => ("work-package", Implementation),
        Deliverable => ("deliverable", Implementation),
        ImplementationEvent => ("implementation-event", Implementation),
        Plateau => ("plateau", Implementation),
        Gap => ("gap", Implementation),

        Location => ("location", Other),
        Grouping => ("grouping", Other),
        Junction => ("junction", Other),
    }
);

vocabulary!(
    /// Relationship (edge) types
    RelationshipType {
        Composition => ("composition-relationship", Relations),
        Aggregation => ("aggregation-relationship", Relations),
        Assignment => ("assignment-relationship", Relations),
        Realization => ("realization-relationship", Relations),
        Serving => ("serving-relationship", Relations),
        Access => ("access-relationship", Relations),
        Influence => ("influence-relationship", Relations),
        Triggering => ("triggering-relationship", Relations),
        Flow => ("flow-relationship", Relations),
        Specialization => ("specialization-relationship", Relations),
        Association => ("association-relationship", Relations),
    }
);

/// Layer lookup by raw type name.
///
/// Validated input never reaches the `Other` fallback; it exists so a type
/// that slipped past validation still lands in a folder.
pub fn layer_for_type(type_name: &str) -> Layer {
    if let Ok(t) = type_name.parse::<ElementType>() {
        return t.layer();
    }
    if type_name.parse::<RelationshipType>().is_ok() {
        return Layer::Relations;
    }
    Layer::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_types_round_trip_through_wire_names() {
        for t in ElementType::ALL {
            assert_eq!(t.as_str().parse::<ElementType>().unwrap(), *t);
        }
    }

    #[test]
    fn unknown_type_names_the_value() {
        let err = "business-wizard".parse::<ElementType>().unwrap_err();
        assert!(err.contains("business-wizard"));
    }

    #[test]
    fn layer_table() {
        assert_eq!(layer_for_type("goal"), Layer::Motivation);
        assert_eq!(layer_for_type("serving-relationship"), Layer::Relations);
        assert_eq!(layer_for_type("no-such-thing"), Layer::Other);
    }
}
