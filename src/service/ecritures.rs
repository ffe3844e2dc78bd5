//! Search and import orchestration over the écritures procedures.
//!
//! Nothing here returns an error to the caller: search failures become a
//! `Failed` outcome with no rows, imports report an [`ImportResult`].

use bigdecimal::BigDecimal;
use indexmap::IndexMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::db::EcrituresGateway;
use crate::models::{
    ColumnHeader, DirectImportForm, FactsImport, FinancialFact, ImportResult, ImportSource,
    ProcedureOutput, SageImportForm, SearchCriteria, SearchOutcome, SearchParams, SearchPhase,
};
use crate::service::spreadsheet::{self, WorkbookKind};

/// Known procedure columns and their headers.
const HEADER_OVERRIDES: &[(&str, &str)] = &[
    ("PER_Id", "Période"),
    ("PER_Annee", "Année"),
    ("PER_Mois", "Mois"),
    ("STA_Id", "Stade"),
    ("STA_Intitule", "Stade"),
    ("SOC_Id", "Société"),
    ("SOC_Code", "Code société"),
    ("SOC_Intitule", "Société"),
    ("TYV_Id", "Type de valeur"),
    ("TYV_Code", "Type de valeur"),
    ("PCL_Compte", "Compte"),
    ("PCL_Intitule", "Intitulé du compte"),
    ("PLG_Code", "Groupe de compte"),
    ("AXE1", "Axe 1"),
    ("AXE2", "Axe 2"),
    ("AXE3", "Axe 3"),
    ("Solde", "Solde"),
    ("Montant", "Montant"),
];

/// Override table first, else underscores become spaces and the first
/// letter is capitalized.
pub fn prettify_header(column: &str) -> String {
    HEADER_OVERRIDES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(column))
        .map(|(_, label)| label.to_string())
        .unwrap_or_else(|| humanize(column))
}

pub fn humanize(column: &str) -> String {
    let spaced = column.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn text(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn int_field(name: &str, value: &Option<String>) -> Result<Option<i32>, String> {
    match text(value) {
        None => Ok(None),
        Some(s) => s
            .parse::<i32>()
            .map(Some)
            .map_err(|_| format!("{} must be an integer", name)),
    }
}

fn required_int(name: &str, value: &Option<String>) -> Result<i32, String> {
    int_field(name, value)?.ok_or_else(|| format!("{} is required", name))
}

/// `None` when every filter is blank: the search stays idle.
pub fn search_params(criteria: &SearchCriteria) -> Result<Option<SearchParams>, String> {
    let params = SearchParams {
        periode_id: int_field("periode", &criteria.periode)?,
        stade_id: int_field("stade", &criteria.stade)?,
        societe_id: int_field("societe", &criteria.societe)?,
        type_valeur_id: int_field("type_valeur", &criteria.type_valeur)?,
        compte: text(&criteria.compte),
        solde: text(&criteria.solde),
        axe1: text(&criteria.axe1),
        axe2: text(&criteria.axe2),
        axe3: text(&criteria.axe3),
    };
    Ok((params != SearchParams::default()).then_some(params))
}

pub fn render(output: ProcedureOutput) -> SearchOutcome {
    let headers = output
        .columns
        .iter()
        .map(|name| ColumnHeader {
            name: name.clone(),
            label: prettify_header(name),
        })
        .collect();
    let rows = output
        .rows
        .into_iter()
        .map(|values| {
            output
                .columns
                .iter()
                .cloned()
                .zip(values)
                .collect::<IndexMap<_, _>>()
        })
        .collect();

    SearchOutcome {
        phase: SearchPhase::Rendered,
        headers,
        rows,
        procedure_message: output.error_message,
        error: None,
    }
}

pub fn direct_fact(form: &DirectImportForm) -> Result<FinancialFact, String> {
    let missing: Vec<&str> = [
        ("periode", &form.periode),
        ("stade", &form.stade),
        ("societe", &form.societe),
        ("type_valeur", &form.type_valeur),
    ]
    .iter()
    .filter(|(_, value)| text(value).is_none())
    .map(|(name, _)| *name)
    .collect();
    if !missing.is_empty() {
        return Err(format!("missing required parameters: {}", missing.join(", ")));
    }

    // Validated as identifiers even though the procedure does not take them.
    required_int("stade", &form.stade)?;
    required_int("societe", &form.societe)?;

    let montant = match text(&form.montant) {
        None => None,
        Some(raw) => Some(
            BigDecimal::from_str(&raw.replace(',', "."))
                .map_err(|_| "montant must be a decimal number".to_string())?,
        ),
    };

    Ok(FinancialFact {
        version_id: int_field("version", &form.version)?,
        lot_id: int_field("lot", &form.lot)?,
        compte_id: int_field("compte", &form.compte)?,
        axe1_id: int_field("axe1", &form.axe1)?,
        axe2_id: int_field("axe2", &form.axe2)?,
        axe3_id: int_field("axe3", &form.axe3)?,
        type_valeur_id: required_int("type_valeur", &form.type_valeur)?,
        periode_id: required_int("periode", &form.periode)?,
        montant,
    })
}

pub fn facts_import(form: &SageImportForm) -> Result<(ImportSource, FactsImport), String> {
    let month = text(&form.mois)
        .ok_or_else(|| "month is required".to_string())?
        .parse::<i32>()
        .map_err(|_| "month must be an integer".to_string())?;
    if !(1..=12).contains(&month) {
        return Err("month out of range".to_string());
    }

    let year_text = text(&form.annee).unwrap_or_default();
    if year_text.len() != 4 || !year_text.chars().all(|c| c.is_ascii_digit()) {
        return Err("year must have exactly four digits".to_string());
    }
    let year: i32 = year_text
        .parse()
        .map_err(|_| "year must have exactly four digits".to_string())?;

    let request = FactsImport {
        actualiser: form.actualiser,
        societe_id: required_int("societe", &form.societe)?,
        stade_id: required_int("stade", &form.stade)?,
        periode_key: year * 100 + month,
        forcer: form.forcer,
        version_id: int_field("version", &form.version)?,
        libelle: text(&form.libelle),
    };
    Ok((form.import_type.unwrap_or(ImportSource::Sage), request))
}

#[derive(Clone)]
pub struct EcrituresService {
    gateway: Arc<dyn EcrituresGateway>,
}

impl EcrituresService {
    pub fn new(gateway: Arc<dyn EcrituresGateway>) -> Self {
        Self { gateway }
    }

    pub async fn search(&self, criteria: &SearchCriteria) -> SearchOutcome {
        let params = match search_params(criteria) {
            Ok(Some(params)) => params,
            Ok(None) => return SearchOutcome::idle(),
            Err(message) => return SearchOutcome::failed(message),
        };

        match self.gateway.search(&params).await {
            Ok(output) => {
                if let Some(message) = &output.error_message {
                    tracing::warn!("search procedure reported: {}", message);
                }
                render(output)
            }
            Err(e) => {
                tracing::error!("search procedure failed: {}", e);
                SearchOutcome::failed(format!("search failed: {}", e))
            }
        }
    }

    pub async fn import_direct(&self, form: &DirectImportForm) -> ImportResult {
        let fact = match direct_fact(form) {
            Ok(fact) => fact,
            Err(message) => return ImportResult::failure(message),
        };

        match self.gateway.insert_fact(&fact).await {
            Ok(()) => ImportResult::ok("import completed"),
            Err(e) => {
                tracing::error!("direct import failed: {}", e);
                ImportResult::failure(format!("import failed: {}", e))
            }
        }
    }

    pub async fn import_facts(&self, form: &SageImportForm) -> ImportResult {
        let (source, request) = match facts_import(form) {
            Ok(parsed) => parsed,
            Err(message) => return ImportResult::failure(message),
        };

        match self.gateway.insert_facts(source, &request).await {
            Ok(()) => ImportResult::ok(format!(
                "{:?} import completed for period {}",
                source, request.periode_key
            )),
            Err(e) => {
                tracing::error!("{:?} import failed: {}", source, e);
                ImportResult::failure(format!("import failed: {}", e))
            }
        }
    }

    /// Replace the staging table with the first worksheet's data rows.
    pub async fn import_file(&self, filename: &str, bytes: Vec<u8>) -> ImportResult {
        let kind = match WorkbookKind::from_filename(filename) {
            Ok(kind) => kind,
            Err(e) => return ImportResult::failure(e.to_string()),
        };
        if bytes.is_empty() {
            return ImportResult::failure(spreadsheet::SpreadsheetError::EmptyFile.to_string());
        }

        let parsed = tokio::task::spawn_blocking(move || {
            spreadsheet::read_data_rows(kind, bytes).map(|rows| spreadsheet::to_staging_rows(&rows))
        })
        .await;
        let rows = match parsed {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => return ImportResult::failure(e.to_string()),
            Err(e) => {
                tracing::error!("spreadsheet parsing task failed: {}", e);
                return ImportResult::failure("cannot read spreadsheet");
            }
        };
        if rows.is_empty() {
            return ImportResult::failure("the spreadsheet contains no data rows");
        }

        match self.gateway.replace_staging(&rows).await {
            Ok(count) => {
                tracing::info!("{}: {} staging rows loaded", filename, count);
                ImportResult::ok(format!("{} rows imported", count)).with_rows(count)
            }
            Err(e) => {
                tracing::error!("staging load failed for {}: {}", filename, e);
                ImportResult::failure(format!("import failed: {}", e))
            }
        }
    }
}
