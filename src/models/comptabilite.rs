use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::meta::{
    describe, normalize, EntityMeta, Field, ForeignKey, IdPolicy, Model,
};

/// Company (T_E_Societe_SOC)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Societe {
    #[serde(default)]
    pub id: Option<i32>,
    pub code: String,
    pub intitule: String,
    #[serde(default)]
    pub groupe: bool,
    #[serde(default)]
    pub archive: Option<bool>,
    #[serde(default)]
    pub devise: Option<i32>,
}

/// Stage (T_E_Stade_STA)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stade {
    #[serde(default)]
    pub id: Option<i32>,
    pub intitule: String,
}

/// Account nature (T_E_NatureCompte_NCT)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatureCompte {
    #[serde(default)]
    pub id: Option<i32>,
    pub code: String,
    pub intitule: String,
}

/// Value type (T_E_TypeValeur_TYV)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeValeur {
    #[serde(default)]
    pub id: Option<i32>,
    pub code: String,
    pub intitule: String,
    #[serde(default)]
    pub commentaires: Option<String>,
}

/// Account plan group (T_E_PlanCompteGroupe_PLG)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanCompteGroupe {
    #[serde(default)]
    pub id: Option<i32>,
    pub code: String,
    pub intitule: String,
    pub nature_compte: i32,
    #[serde(default)]
    pub date_creation: Option<NaiveDateTime>,
    #[serde(default)]
    pub date_maj: Option<NaiveDateTime>,
}

/// Local account (T_E_PlanCompteLocal_PCL)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanCompteLocal {
    #[serde(default)]
    pub id: Option<i32>,
    pub compte: String,
    pub intitule: String,
    pub societe: i32,
    pub groupe: i32,
    #[serde(default)]
    pub date_creation: Option<NaiveDateTime>,
    #[serde(default)]
    pub date_maj: Option<NaiveDateTime>,
}

/// Currency (T_E_Devises_DEV)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Devise {
    #[serde(default)]
    pub id: Option<i32>,
    #[serde(default)]
    pub code_iso: Option<String>,
    #[serde(default)]
    pub intitule: Option<String>,
    #[serde(default)]
    pub sigle: Option<String>,
}

pub static SOCIETE: EntityMeta = EntityMeta {
    app_label: "comptabilite",
    model_name: "societe",
    declared_name: "Societe",
    slug: "societes",
    table: "T_E_Societe_SOC",
    verbose_name: "Société",
    verbose_name_plural: "Sociétés",
    id_policy: IdPolicy::NextMax,
    fields: &[
        Field::int("id", "SOC_Id"),
        Field::text("code", "SOC_Code").max(50).required().unique(),
        Field::text("intitule", "SOC_Intitule").max(255).required(),
        Field::boolean("groupe", "SOC_Groupe"),
        Field::boolean("archive", "SOC_Archive"),
        Field::int("devise", "DEV_Id"),
    ],
    search: &["code", "intitule"],
    filters: &["groupe", "archive"],
    sortable: &["id", "code", "intitule", "groupe", "archive"],
    default_sort: &["code"],
    foreign_keys: &[ForeignKey {
        field: "devise",
        target: &DEVISE,
        nullable: true,
    }],
    unique_together: &[],
    normalize: normalize::<Societe>,
    describe: describe::<Societe>,
};

pub static STADE: EntityMeta = EntityMeta {
    app_label: "comptabilite",
    model_name: "stade",
    declared_name: "Stade",
    slug: "stades",
    table: "T_E_Stade_STA",
    verbose_name: "Stade",
    verbose_name_plural: "Stades",
    id_policy: IdPolicy::NextMax,
    fields: &[
        Field::int("id", "STA_Id"),
        Field::text("intitule", "STA_Intitule").max(255).required(),
    ],
    search: &["intitule"],
    filters: &[],
    sortable: &["id", "intitule"],
    default_sort: &["intitule"],
    foreign_keys: &[],
    unique_together: &[],
    normalize: normalize::<Stade>,
    describe: describe::<Stade>,
};

pub static NATURE_COMPTE: EntityMeta = EntityMeta {
    app_label: "comptabilite",
    model_name: "naturecompte",
    declared_name: "NatureCompte",
    slug: "natures-compte",
    table: "T_E_NatureCompte_NCT",
    verbose_name: "Nature de Compte",
    verbose_name_plural: "Natures de Compte",
    id_policy: IdPolicy::NextMax,
    fields: &[
        Field::int("id", "NCT_Id"),
        Field::text("code", "NCT_Code").max(10).required().unique(),
        Field::text("intitule", "NCT_Intitule").max(255).required(),
    ],
    search: &["code", "intitule"],
    filters: &[],
    sortable: &["id", "code", "intitule"],
    default_sort: &["code"],
    foreign_keys: &[],
    unique_together: &[],
    normalize: normalize::<NatureCompte>,
    describe: describe::<NatureCompte>,
};

pub static TYPE_VALEUR: EntityMeta = EntityMeta {
    app_label: "comptabilite",
    model_name: "typevaleur",
    declared_name: "TypeValeur",
    slug: "types-valeur",
    table: "T_E_TypeValeur_TYV",
    verbose_name: "Type de Valeur",
    verbose_name_plural: "Types de Valeur",
    id_policy: IdPolicy::NextMax,
    fields: &[
        Field::int("id", "TYV_Id"),
        Field::text("code", "TYV_code").max(10).required().unique(),
        Field::text("intitule", "TYV_Intitule").max(255).required(),
        Field::text("commentaires", "TYV_Commentaires"),
    ],
    search: &["code", "intitule"],
    filters: &[],
    sortable: &["id", "code", "intitule"],
    default_sort: &["code"],
    foreign_keys: &[],
    unique_together: &[],
    normalize: normalize::<TypeValeur>,
    describe: describe::<TypeValeur>,
};

pub static PLAN_COMPTE_GROUPE: EntityMeta = EntityMeta {
    app_label: "comptabilite",
    model_name: "plancomptegroupe",
    declared_name: "PlanCompteGroupe",
    slug: "groupes-compte",
    table: "T_E_PlanCompteGroupe_PLG",
    verbose_name: "Groupe de Plan Comptable",
    verbose_name_plural: "Groupes de Plan Comptable",
    id_policy: IdPolicy::Identity,
    fields: &[
        Field::int("id", "PLG_Id"),
        Field::text("code", "PLG_Code").max(20).required(),
        Field::text("intitule", "PLG_Intitule").max(255).required(),
        Field::int("nature_compte", "NCT_Id").required(),
        Field::datetime("date_creation", "PLG_DateCreation"),
        Field::datetime("date_maj", "PLG_DateMAJ"),
    ],
    search: &["code", "intitule"],
    filters: &["nature_compte"],
    sortable: &["id", "code", "intitule", "date_creation"],
    default_sort: &["code"],
    foreign_keys: &[ForeignKey {
        field: "nature_compte",
        target: &NATURE_COMPTE,
        nullable: false,
    }],
    unique_together: &[],
    normalize: normalize::<PlanCompteGroupe>,
    describe: describe::<PlanCompteGroupe>,
};

// The legacy PCL table carries its timestamps under the PLG_ column names.
pub static PLAN_COMPTE_LOCAL: EntityMeta = EntityMeta {
    app_label: "comptabilite",
    model_name: "plancomptelocal",
    declared_name: "PlanCompteLocal",
    slug: "comptes-locaux",
    table: "T_E_PlanCompteLocal_PCL",
    verbose_name: "Compte Local",
    verbose_name_plural: "Comptes Locaux",
    id_policy: IdPolicy::Identity,
    fields: &[
        Field::int("id", "PCL_Id"),
        Field::text("compte", "PCL_Compte").max(20).required(),
        Field::text("intitule", "PCL_Intitule").max(255).required(),
        Field::int("societe", "SOC_Id").required(),
        Field::int("groupe", "PLG_Id").required(),
        Field::datetime("date_creation", "PLG_DateCreation"),
        Field::datetime("date_maj", "PLG_DateMAJ"),
    ],
    search: &["compte", "intitule"],
    filters: &["societe", "groupe"],
    sortable: &["id", "compte", "intitule", "date_creation"],
    default_sort: &["compte"],
    foreign_keys: &[
        ForeignKey {
            field: "societe",
            target: &SOCIETE,
            nullable: false,
        },
        ForeignKey {
            field: "groupe",
            target: &PLAN_COMPTE_GROUPE,
            nullable: false,
        },
    ],
    unique_together: &[],
    normalize: normalize::<PlanCompteLocal>,
    describe: describe::<PlanCompteLocal>,
};

pub static DEVISE: EntityMeta = EntityMeta {
    app_label: "comptabilite",
    model_name: "devise",
    declared_name: "Devise",
    slug: "devises",
    table: "T_E_Devises_DEV",
    verbose_name: "Devise",
    verbose_name_plural: "Devises",
    id_policy: IdPolicy::NextMax,
    fields: &[
        Field::int("id", "DEV_Id"),
        Field::text("code_iso", "DEV_CodeIso").max(3),
        Field::text("intitule", "DEV_Intitule").max(20),
        Field::text("sigle", "DEV_Sigle").max(3),
    ],
    search: &["code_iso", "intitule", "sigle"],
    filters: &[],
    sortable: &["id", "code_iso", "intitule", "sigle"],
    default_sort: &["code_iso"],
    foreign_keys: &[],
    unique_together: &[],
    normalize: normalize::<Devise>,
    describe: describe::<Devise>,
};

impl Model for Societe {
    fn meta() -> &'static EntityMeta {
        &SOCIETE
    }
}

impl Model for Stade {
    fn meta() -> &'static EntityMeta {
        &STADE
    }
}

impl Model for NatureCompte {
    fn meta() -> &'static EntityMeta {
        &NATURE_COMPTE
    }
}

impl Model for TypeValeur {
    fn meta() -> &'static EntityMeta {
        &TYPE_VALEUR
    }
}

impl Model for PlanCompteGroupe {
    fn meta() -> &'static EntityMeta {
        &PLAN_COMPTE_GROUPE
    }
}

impl Model for PlanCompteLocal {
    fn meta() -> &'static EntityMeta {
        &PLAN_COMPTE_LOCAL
    }
}

impl Model for Devise {
    fn meta() -> &'static EntityMeta {
        &DEVISE
    }
}

impl fmt::Display for Societe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.code, self.intitule)
    }
}

impl fmt::Display for Stade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.intitule)
    }
}

impl fmt::Display for NatureCompte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.code, self.intitule)
    }
}

impl fmt::Display for TypeValeur {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.code, self.intitule)
    }
}

impl fmt::Display for PlanCompteGroupe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.code, self.intitule)
    }
}

impl fmt::Display for PlanCompteLocal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.compte, self.intitule)
    }
}

impl fmt::Display for Devise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}",
            self.code_iso.as_deref().unwrap_or("None"),
            self.intitule.as_deref().unwrap_or("None")
        )
    }
}
