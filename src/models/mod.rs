pub mod comptabilite;
pub mod ecritures;
pub mod label;
pub mod meta;
pub mod perimetre;
pub mod referentiel;

pub use comptabilite::{
    Devise, NatureCompte, PlanCompteGroupe, PlanCompteLocal, Societe, Stade, TypeValeur,
    DEVISE, NATURE_COMPTE, PLAN_COMPTE_GROUPE, PLAN_COMPTE_LOCAL, SOCIETE, STADE, TYPE_VALEUR,
};
pub use ecritures::{
    ColumnHeader, DirectImportForm, FactsImport, FinancialFact, ImportResult, ImportSource,
    ProcedureOutput, SageImportForm, SearchCriteria, SearchOutcome, SearchParams, SearchPhase,
    StagingRow, STAGING_COLUMNS,
};
pub use label::{LabelEntry, ADMIN_TEXT};
pub use meta::{Capability, EntityMeta, Field, FieldKind, ForeignKey, IdPolicy, Model, Record};
pub use perimetre::{PerimetreConso, PerimetreSociete, PERIMETRE_CONSO, PERIMETRE_SOCIETE_TABLE};
pub use referentiel::{Periode, PERIODE};

/// Every entity exposed through pages, the REST API and the admin index.
pub static ENTITIES: [&EntityMeta; 10] = [
    &SOCIETE,
    &STADE,
    &NATURE_COMPTE,
    &TYPE_VALEUR,
    &PLAN_COMPTE_GROUPE,
    &PLAN_COMPTE_LOCAL,
    &DEVISE,
    &PERIODE,
    &PERIMETRE_CONSO,
    &ADMIN_TEXT,
];

/// Admin sections, in display order.
pub const SECTIONS: [(&str, &str); 4] = [
    ("comptabilite", "Comptabilité"),
    ("referentiel", "Référentiel"),
    ("perimetre_consolidation", "Périmètre de consolidation"),
    ("parametres", "Paramètres"),
];

pub fn entity_by_slug(slug: &str) -> Option<&'static EntityMeta> {
    ENTITIES.iter().copied().find(|meta| meta.slug == slug)
}
