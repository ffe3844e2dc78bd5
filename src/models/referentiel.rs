use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::meta::{describe, normalize, EntityMeta, Field, IdPolicy, Model};

/// Accounting period (T_R_Periode_PER)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Periode {
    pub id: i32,
    #[serde(default)]
    pub date: Option<NaiveDateTime>,
    #[serde(default)]
    pub annee: Option<i32>,
    #[serde(default)]
    pub mois: Option<i32>,
    #[serde(default)]
    pub trimestre_civil: Option<i32>,
}

impl Periode {
    /// `YYYY-MM`, falling back to the stored date, then to the identifier.
    pub fn periode_display(&self) -> String {
        match (self.annee, self.mois, self.date) {
            (Some(annee), Some(mois), _) if annee != 0 && mois != 0 => {
                format!("{}-{:02}", annee, mois)
            }
            (_, _, Some(date)) => date.format("%Y-%m").to_string(),
            _ => format!("Période {}", self.id),
        }
    }

    pub fn trimestre_display(&self) -> String {
        match self.trimestre_civil {
            Some(t) if t != 0 => format!("T{}", t),
            _ => String::new(),
        }
    }
}

pub static PERIODE: EntityMeta = EntityMeta {
    app_label: "referentiel",
    model_name: "periode",
    declared_name: "Periode",
    slug: "periodes",
    table: "T_R_Periode_PER",
    verbose_name: "Période",
    verbose_name_plural: "Périodes",
    id_policy: IdPolicy::Supplied,
    fields: &[
        Field::int("id", "PER_Id"),
        Field::datetime("date", "PER_Date"),
        Field::int("annee", "PER_Annee"),
        Field::int("mois", "PER_Mois"),
        Field::int("trimestre_civil", "PER_TrimestreCivil"),
    ],
    search: &["annee", "mois"],
    filters: &["annee", "mois", "trimestre_civil"],
    sortable: &["id", "annee", "mois", "date"],
    default_sort: &["annee", "mois"],
    foreign_keys: &[],
    unique_together: &[],
    normalize: normalize::<Periode>,
    describe: describe::<Periode>,
};

impl Model for Periode {
    fn meta() -> &'static EntityMeta {
        &PERIODE
    }
}

impl fmt::Display for Periode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.periode_display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn periode(annee: Option<i32>, mois: Option<i32>, date: Option<NaiveDateTime>) -> Periode {
        Periode {
            id: 42,
            date,
            annee,
            mois,
            trimestre_civil: Some(2),
        }
    }

    #[test]
    fn test_display_prefers_year_and_month() {
        assert_eq!(periode(Some(2024), Some(3), None).to_string(), "2024-03");
    }

    #[test]
    fn test_display_falls_back_to_date_then_id() {
        let date = NaiveDate::from_ymd_opt(2023, 11, 30)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(periode(Some(2023), None, Some(date)).to_string(), "2023-11");
        assert_eq!(periode(None, None, None).to_string(), "Période 42");
    }

    #[test]
    fn test_trimestre_display() {
        assert_eq!(periode(None, None, None).trimestre_display(), "T2");
    }
}
