use serde::{Deserialize, Serialize};
use std::fmt;

use super::meta::{describe, normalize, EntityMeta, Field, IdPolicy, Model};

/// Consolidation scope (T_E_PerimetreConso_PEC)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerimetreConso {
    pub id: i32,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub libelle: Option<String>,
}

/// Association row between a consolidation scope and a company.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PerimetreSociete {
    pub perimetre: i32,
    pub societe: i32,
}

pub const PERIMETRE_SOCIETE_TABLE: &str = "T_J_PerimetreSociete_PES";

pub static PERIMETRE_CONSO: EntityMeta = EntityMeta {
    app_label: "perimetre_consolidation",
    model_name: "perimetreconso",
    declared_name: "PerimetreConso",
    slug: "perimetres",
    table: "T_E_PerimetreConso_PEC",
    verbose_name: "Périmètre Consolidation",
    verbose_name_plural: "Périmètres Consolidation",
    id_policy: IdPolicy::Supplied,
    fields: &[
        Field::int("id", "PEC_Id"),
        Field::text("code", "PEC_Code").max(50),
        Field::text("libelle", "PEC_Libelle").max(255),
    ],
    search: &["code", "libelle"],
    filters: &[],
    sortable: &["id", "code", "libelle"],
    default_sort: &["code", "libelle"],
    foreign_keys: &[],
    unique_together: &[],
    normalize: normalize::<PerimetreConso>,
    describe: describe::<PerimetreConso>,
};

impl Model for PerimetreConso {
    fn meta() -> &'static EntityMeta {
        &PERIMETRE_CONSO
    }
}

impl fmt::Display for PerimetreConso {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.code.as_deref().filter(|s| !s.is_empty());
        let libelle = self.libelle.as_deref().filter(|s| !s.is_empty());
        match (code, libelle) {
            (Some(code), Some(libelle)) => write!(f, "{} - {}", code, libelle),
            (Some(code), None) => f.write_str(code),
            (None, Some(libelle)) => f.write_str(libelle),
            (None, None) => write!(f, "Périmètre {}", self.id),
        }
    }
}
