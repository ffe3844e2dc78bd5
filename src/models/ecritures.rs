use bigdecimal::BigDecimal;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Search form as submitted; every filter is optional free text.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SearchCriteria {
    #[serde(default)]
    pub periode: Option<String>,
    #[serde(default)]
    pub stade: Option<String>,
    #[serde(default)]
    pub societe: Option<String>,
    #[serde(default)]
    pub type_valeur: Option<String>,
    #[serde(default)]
    pub compte: Option<String>,
    #[serde(default)]
    pub solde: Option<String>,
    #[serde(default)]
    pub axe1: Option<String>,
    #[serde(default)]
    pub axe2: Option<String>,
    #[serde(default)]
    pub axe3: Option<String>,
}

/// Arguments of the search procedure, in call order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchParams {
    pub periode_id: Option<i32>,
    pub stade_id: Option<i32>,
    pub societe_id: Option<i32>,
    pub type_valeur_id: Option<i32>,
    pub compte: Option<String>,
    pub solde: Option<String>,
    pub axe1: Option<String>,
    pub axe2: Option<String>,
    pub axe3: Option<String>,
}

/// Raw result of the search procedure.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcedureOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Value of the procedure's error OUTPUT parameter.
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnHeader {
    pub name: String,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPhase {
    /// No filter submitted; the procedure was not called.
    Idle,
    Rendered,
    /// The procedure call failed; rows are empty.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub phase: SearchPhase,
    pub headers: Vec<ColumnHeader>,
    pub rows: Vec<IndexMap<String, Value>>,
    pub procedure_message: Option<String>,
    pub error: Option<String>,
}

impl SearchOutcome {
    pub fn idle() -> Self {
        Self {
            phase: SearchPhase::Idle,
            headers: Vec::new(),
            rows: Vec::new(),
            procedure_message: None,
            error: None,
        }
    }

    pub fn failed(error: String) -> Self {
        Self {
            phase: SearchPhase::Failed,
            error: Some(error),
            ..Self::idle()
        }
    }
}

/// Direct import form: the four identifiers are mandatory.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectImportForm {
    #[serde(default)]
    pub periode: Option<String>,
    #[serde(default)]
    pub stade: Option<String>,
    #[serde(default)]
    pub societe: Option<String>,
    #[serde(default)]
    pub type_valeur: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub lot: Option<String>,
    #[serde(default)]
    pub compte: Option<String>,
    #[serde(default)]
    pub axe1: Option<String>,
    #[serde(default)]
    pub axe2: Option<String>,
    #[serde(default)]
    pub axe3: Option<String>,
    #[serde(default)]
    pub montant: Option<String>,
}

/// Arguments of the direct "insert financial fact" procedure, in call order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinancialFact {
    pub version_id: Option<i32>,
    pub lot_id: Option<i32>,
    pub compte_id: Option<i32>,
    pub axe1_id: Option<i32>,
    pub axe2_id: Option<i32>,
    pub axe3_id: Option<i32>,
    pub type_valeur_id: i32,
    pub periode_id: i32,
    pub montant: Option<BigDecimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportSource {
    Sage,
    Exact,
}

/// Sage/Exact import form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SageImportForm {
    #[serde(default)]
    pub mois: Option<String>,
    #[serde(default)]
    pub annee: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub societe: Option<String>,
    #[serde(default)]
    pub stade: Option<String>,
    #[serde(default)]
    pub import_type: Option<ImportSource>,
    #[serde(default, deserialize_with = "checkbox")]
    pub actualiser: bool,
    #[serde(default, deserialize_with = "checkbox")]
    pub forcer: bool,
    #[serde(default)]
    pub libelle: Option<String>,
}

/// HTML checkboxes post `on`; JSON clients send booleans.
fn checkbox<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Text(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Bool(b) => b,
        Raw::Text(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "on" | "true" | "1" | "oui"),
    })
}

/// Arguments of the Sage/Exact procedures, in call order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FactsImport {
    pub actualiser: bool,
    pub societe_id: i32,
    pub stade_id: i32,
    pub periode_key: i32,
    pub forcer: bool,
    pub version_id: Option<i32>,
    pub libelle: Option<String>,
}

/// Destination columns of the staging table, in insert order.
pub const STAGING_COLUMNS: [&str; 24] = [
    "Societe",
    "Annee",
    "Version",
    "CompteGeneral",
    "Section",
    "GroupeCode",
    "RefactCode",
    "Parametre",
    "Periode",
    "Valeur",
    "SOC_Id",
    "SocieteNom",
    "CompteIntitule",
    "PLG_Code",
    "PLG_Intitule",
    "NCT_Intitule",
    "NCT_Code",
    "SIG_Code",
    "SIG_Intitule",
    "TFT_code",
    "TFT_Intitule",
    "BLN_code",
    "BLN_Intitule",
    "TypeValeur",
];

/// One spreadsheet line mapped positionally onto [`STAGING_COLUMNS`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StagingRow {
    pub values: [Option<String>; 24],
}

impl StagingRow {
    /// Cells beyond the 24th are dropped; missing cells stay null.
    pub fn from_cells(cells: &[Option<String>]) -> Self {
        let mut row = StagingRow::default();
        for (slot, cell) in row.values.iter_mut().zip(cells.iter()) {
            *slot = cell.clone();
        }
        row
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        STAGING_COLUMNS
            .iter()
            .position(|c| *c == column)
            .and_then(|idx| self.values[idx].as_deref())
    }
}

/// Structured outcome shared by the three import operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<u64>,
}

impl ImportResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            rows: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            rows: None,
        }
    }

    pub fn with_rows(mut self, rows: u64) -> Self {
        self.rows = Some(rows);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkbox_values() {
        let form: SageImportForm =
            serde_json::from_value(serde_json::json!({"actualiser": "on", "forcer": false})).unwrap();
        assert!(form.actualiser);
        assert!(!form.forcer);

        let form: SageImportForm = serde_json::from_value(serde_json::json!({"forcer": true})).unwrap();
        assert!(!form.actualiser);
        assert!(form.forcer);
    }

    #[test]
    fn test_staging_row_truncates_and_pads() {
        let row = StagingRow::from_cells(&[Some("SOC01".into()), None, Some("V1".into())]);
        assert_eq!(row.get("Societe"), Some("SOC01"));
        assert_eq!(row.get("Annee"), None);
        assert_eq!(row.get("Version"), Some("V1"));
        assert_eq!(row.get("TypeValeur"), None);
        assert_eq!(row.get("Inconnue"), None);
    }
}
