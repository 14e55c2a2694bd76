//! Offense-table row processing.
//!
//! The first row of a `tabla_en_texto` table maps each column to a known
//! property through an alias table; every later row becomes one
//! `TrafficOffense`. Row-level problems (bad dates, malformed plates) ride
//! on the row; structural problems (an alias nobody has seen) reject the
//! whole document; an unknown country halts the run.

use thiserror::Error;

use super::time::parse_event_time;
use super::ur::parse_ur;
use crate::analysis::normalize_vehicle_id;
use crate::models::{Document, TrafficOffense};
use crate::utils::text::{normalize_country_name, normalize_header};

/// Column property a header cell can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Vehicle,
    Time,
    Location,
    OffenseId,
    Description,
    Ur,
    /// Auxiliary locality column, appended to the location after the row.
    Localidad,
    /// Auxiliary time-of-day column, recombined with the date after the row.
    Hora,
    Country,
    Ignore,
}

/// Known header aliases, matched after `normalize_header` (letters only,
/// accent-free, lowercase). Typos like `MATRICLA` are real and load-bearing.
const HEADER_ALIASES: &[(&str, Column)] = &[
    ("matricula", Column::Vehicle),
    ("matriculaypadron", Column::Vehicle),
    ("mat", Column::Vehicle),
    ("matricla", Column::Vehicle),
    ("atricula", Column::Vehicle),
    ("fechayhora", Column::Time),
    ("fechahora", Column::Time),
    ("fecha", Column::Time),
    ("fechaingreso", Column::Time),
    ("interseccion", Column::Location),
    ("lugar", Column::Location),
    ("ubicacion", Column::Location),
    ("intervenido", Column::OffenseId),
    ("serieboleta", Column::OffenseId),
    ("id", Column::OffenseId),
    ("idboleta", Column::OffenseId),
    ("articulo", Column::Description),
    ("infraccion", Column::Description),
    ("nomtributo", Column::Description),
    ("detalle", Column::Description),
    ("detalles", Column::Description),
    ("multa", Column::Description),
    ("conductor", Column::Description),
    ("valorenur", Column::Ur),
    ("valorur", Column::Ur),
    ("valortotal", Column::Ur),
    ("valor", Column::Ur),
    ("ur", Column::Ur),
    ("monto", Column::Ur),
    ("localidad", Column::Localidad),
    ("hora", Column::Hora),
    ("pais", Column::Country),
    ("unidad", Column::Ignore),
    ("cantidad", Column::Ignore),
    ("ci", Column::Ignore),
];

pub fn column_for_header(raw: &str) -> Option<Column> {
    let normalized = normalize_header(raw);
    HEADER_ALIASES
        .iter()
        .find(|(alias, _)| *alias == normalized)
        .map(|(_, column)| *column)
}

const COUNTRY_CODES: &[(&str, &str)] = &[
    ("uruguay", "UY"),
    ("argentina", "AR"),
    ("brasil", "BR"),
    ("paraguay", "PY"),
    ("chile", "CL"),
    ("otro", ""),
];

/// Map a country cell to its ISO code. An unknown non-empty value is fatal
/// for the whole run: a new country in the source means the classification
/// tables must be taught first.
fn country_code(raw: &str) -> Result<&'static str, TableError> {
    let normalized = normalize_country_name(raw);
    if normalized.is_empty() {
        return Ok("");
    }
    COUNTRY_CODES
        .iter()
        .find(|(name, _)| *name == normalized)
        .map(|(_, code)| *code)
        .ok_or_else(|| TableError::UnknownCountry(raw.trim().to_string()))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("encabezado de tabla desconocido: {0:?}")]
    UnknownHeader(String),
    #[error("tabla sin columna de descripción")]
    MissingDescription,
    #[error("país desconocido: {0:?}")]
    UnknownCountry(String),
}

#[derive(Debug, Default)]
pub struct ParsedTable {
    pub offenses: Vec<TrafficOffense>,
    /// Rows whose `error` field is non-empty.
    pub errors: usize,
}

/// Process one offense table: `header` is the first row's cell texts,
/// `rows` the remaining rows. Offenses keep their on-page order and are
/// appended even when invalid.
pub fn process_table(
    header: &[String],
    rows: &[Vec<String>],
    doc: &Document,
    default_description: &str,
) -> Result<ParsedTable, TableError> {
    let columns = header
        .iter()
        .map(|cell| {
            column_for_header(cell).ok_or_else(|| TableError::UnknownHeader(cell.trim().to_string()))
        })
        .collect::<Result<Vec<Column>, TableError>>()?;

    let has_description = columns.contains(&Column::Description);
    if !has_description && default_description.is_empty() {
        return Err(TableError::MissingDescription);
    }
    let has_time = columns.contains(&Column::Time);

    let mut table = ParsedTable::default();
    for (i, cells) in rows.iter().enumerate() {
        let mut offense = TrafficOffense {
            doc: doc.clone(),
            record_id: (i + 1) as u32,
            ..TrafficOffense::default()
        };
        if !has_time {
            offense.time = doc.date;
        }
        if !default_description.is_empty() {
            offense.description = default_description.to_string();
        }

        let mut fecha = String::new();
        let mut hora = String::new();
        let mut localidad = String::new();
        let mut row_error: Option<String> = None;
        let record_error = |e: String, slot: &mut Option<String>| {
            if slot.is_none() {
                *slot = Some(e);
            }
        };

        for (column, cell) in columns.iter().zip(cells.iter()) {
            let text = cell.trim();
            match column {
                Column::Vehicle => offense.vehicle = normalize_vehicle_id(text),
                Column::Time => {
                    fecha = text.to_string();
                    match parse_event_time(text) {
                        Ok(t) => offense.time = Some(t),
                        Err(e) => record_error(e.to_string(), &mut row_error),
                    }
                }
                Column::Location => offense.location = text.to_string(),
                Column::OffenseId => offense.id = text.to_string(),
                Column::Description => {
                    offense.description = text.strip_prefix(": ").unwrap_or(text).to_string();
                }
                Column::Ur => match parse_ur(text) {
                    Ok(v) => offense.ur = v,
                    Err(e) => record_error(e.to_string(), &mut row_error),
                },
                Column::Localidad => localidad = text.to_string(),
                Column::Hora => hora = text.to_string(),
                Column::Country => offense.vehicle_info.country = country_code(text)?.to_string(),
                Column::Ignore => {}
            }
        }

        if !offense.location.is_empty() && !localidad.is_empty() {
            offense.location = format!("{}, {}", offense.location, localidad);
        }
        if !fecha.is_empty() && offense.time.is_some() {
            if let Ok(t) = parse_event_time(&format!("{fecha} {hora}")) {
                offense.time = Some(t);
            }
        }

        if row_error.is_none() {
            if let Err(e) = offense.validate() {
                row_error = Some(e.to_string());
            }
        }
        if let Some(e) = row_error {
            offense.error = e;
            table.errors += 1;
        }
        table.offenses.push(offense);
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Local, NaiveDate, TimeZone, Timelike};

    fn doc(date: (i32, u32, u32)) -> Document {
        Document {
            source: "https://example.test/doc".to_string(),
            doc_id: "1/025".to_string(),
            date: Local
                .from_local_datetime(
                    &NaiveDate::from_ymd_opt(date.0, date.1, date.2)
                        .unwrap()
                        .and_hms_opt(0, 0, 0)
                        .unwrap(),
                )
                .single(),
        }
    }

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_maldonado_row() {
        let header = strings(&[
            "Matricula",
            "Fecha y Hora",
            "Interseccion",
            "Intervenido",
            "Articulo",
            "Valor en UR",
        ]);
        let rows = vec![strings(&[
            "ZME2015",
            "01/01/2025 00:00",
            "Ruta Interbalnearia y Rosa de los Vientos",
            "IDM 0000000000",
            "Exceso de velocidad hasta 20 km/h",
            "5",
        ])];
        let table = process_table(&header, &rows, &doc((2025, 2, 1)), "").unwrap();

        assert_eq!(table.errors, 0);
        assert_eq!(table.offenses.len(), 1);
        let o = &table.offenses[0];
        assert_eq!(o.record_id, 1);
        assert_eq!(o.vehicle, "ZME2015");
        let t = o.time.unwrap();
        assert_eq!((t.year(), t.month(), t.day()), (2025, 1, 1));
        assert_eq!((t.hour(), t.minute()), (0, 0));
        assert_eq!(o.location, "Ruta Interbalnearia y Rosa de los Vientos");
        assert_eq!(o.id, "IDM 0000000000");
        assert_eq!(o.description, "Exceso de velocidad hasta 20 km/h");
        assert_eq!(o.ur, 500);
        assert_eq!(o.error, "");
    }

    #[test]
    fn test_lavalleja_split_date_time_and_locality() {
        let header = strings(&[
            "MATRICULA",
            "INFRACCION",
            "VALOR",
            "FECHA",
            "HORA",
            "UBICACIÓN",
            "LOCALIDAD",
        ]);
        let rows = vec![strings(&[
            "ABE 8658",
            "ADELANTAR POR LA DERECHA",
            "3",
            "31/03/2024",
            "17:27",
            "L.A. DE HERRERA Y LAVALLEJA",
            "MINAS",
        ])];
        let table = process_table(&header, &rows, &doc((2024, 4, 15)), "").unwrap();

        assert_eq!(table.errors, 0);
        let o = &table.offenses[0];
        assert_eq!(o.vehicle, "ABE8658");
        let t = o.time.unwrap();
        assert_eq!((t.year(), t.month(), t.day()), (2024, 3, 31));
        assert_eq!((t.hour(), t.minute()), (17, 27));
        assert_eq!(o.location, "L.A. DE HERRERA Y LAVALLEJA, MINAS");
        assert_eq!(o.ur, 300);
    }

    #[test]
    fn test_default_description_fills_missing_column() {
        let header = strings(&["Matricula", "Fecha y Hora"]);
        let rows = vec![strings(&["SBF1234", "10/12/2025 10:00"])];
        let table = process_table(
            &header,
            &rows,
            &doc((2025, 12, 20)),
            "Cobros por acciones, trámites o gestiones",
        )
        .unwrap();

        assert_eq!(table.errors, 0);
        assert_eq!(
            table.offenses[0].description,
            "Cobros por acciones, trámites o gestiones"
        );
    }

    #[test]
    fn test_missing_description_without_default_rejects() {
        let header = strings(&["Matricula", "Fecha y Hora"]);
        assert_eq!(
            process_table(&header, &[], &doc((2025, 1, 1)), "").unwrap_err(),
            TableError::MissingDescription
        );
    }

    #[test]
    fn test_unknown_header_rejects() {
        let header = strings(&["Matricula", "Sorpresa"]);
        assert_eq!(
            process_table(&header, &[], &doc((2025, 1, 1)), "x").unwrap_err(),
            TableError::UnknownHeader("Sorpresa".to_string())
        );
    }

    #[test]
    fn test_missing_time_column_inherits_publication_date() {
        let header = strings(&["Matricula", "Articulo"]);
        let rows = vec![strings(&["SBF1234", "Estacionar en lugar prohibido"])];
        let table = process_table(&header, &rows, &doc((2025, 2, 1)), "").unwrap();

        assert_eq!(table.errors, 0);
        let t = table.offenses[0].time.unwrap();
        assert_eq!((t.year(), t.month(), t.day()), (2025, 2, 1));
    }

    #[test]
    fn test_row_after_publication_is_recorded_not_dropped() {
        let header = strings(&["Matricula", "Fecha y Hora", "Articulo"]);
        let rows = vec![strings(&["SBF1234", "10/03/2025 08:00", "Exceso de velocidad"])];
        let table = process_table(&header, &rows, &doc((2025, 2, 1)), "").unwrap();

        assert_eq!(table.errors, 1);
        assert_eq!(table.offenses.len(), 1);
        assert_eq!(table.offenses[0].error, "fecha posterior a publicación");
    }

    #[test]
    fn test_bad_plate_is_row_error() {
        let header = strings(&["Matricula", "Fecha y Hora", "Articulo"]);
        let rows = vec![
            strings(&["A", "01/01/2025 10:00", "Exceso de velocidad"]),
            strings(&["SBF1234", "01/01/2025 10:00", "Exceso de velocidad"]),
        ];
        let table = process_table(&header, &rows, &doc((2025, 2, 1)), "").unwrap();

        assert_eq!(table.errors, 1);
        assert!(!table.offenses[0].error.is_empty());
        assert_eq!(table.offenses[1].error, "");
        assert_eq!(table.offenses[1].record_id, 2);
    }

    #[test]
    fn test_country_column() {
        let header = strings(&["Matricula", "Fecha y Hora", "Articulo", "País"]);
        let rows = vec![strings(&[
            "AA000AA",
            "01/01/2025 10:00",
            "Exceso de velocidad",
            "Argentina",
        ])];
        let table = process_table(&header, &rows, &doc((2025, 2, 1)), "").unwrap();
        assert_eq!(table.offenses[0].vehicle_info.country, "AR");
    }

    #[test]
    fn test_unknown_country_is_fatal() {
        let header = strings(&["Matricula", "Fecha y Hora", "Articulo", "País"]);
        let rows = vec![strings(&[
            "SBF1234",
            "01/01/2025 10:00",
            "Exceso de velocidad",
            "Atlántida",
        ])];
        assert_eq!(
            process_table(&header, &rows, &doc((2025, 2, 1)), "").unwrap_err(),
            TableError::UnknownCountry("Atlántida".to_string())
        );
    }

    #[test]
    fn test_otro_country_maps_to_empty() {
        assert_eq!(country_code("Otro"), Ok(""));
        assert_eq!(country_code(""), Ok(""));
        assert_eq!(country_code("URUGUAY"), Ok("UY"));
    }

    #[test]
    fn test_alias_variants() {
        for (header, expected) in [
            ("Matrícula y padrón", Column::Vehicle),
            ("MATRICLA", Column::Vehicle),
            ("ATRICULA", Column::Vehicle),
            ("MAT.", Column::Vehicle),
            ("Fecha Ingreso", Column::Time),
            ("Fecha-Hora", Column::Time),
            ("Lugar", Column::Location),
            ("Serie-Boleta", Column::OffenseId),
            ("ID_BOLETA", Column::OffenseId),
            ("Nom. Tributo", Column::Description),
            ("CONDUCTOR", Column::Description),
            ("Valor Total", Column::Ur),
            ("Monto", Column::Ur),
            ("País", Column::Country),
            ("CI.", Column::Ignore),
            ("Cantidad", Column::Ignore),
        ] {
            assert_eq!(column_for_header(header), Some(expected), "alias {header:?}");
        }
        assert_eq!(column_for_header("Observaciones"), None);
    }

    #[test]
    fn test_ignore_column_values_do_not_leak() {
        let header = strings(&["Matricula", "Fecha y Hora", "Articulo", "Unidad"]);
        let rows = vec![strings(&[
            "SBF1234",
            "01/01/2025 10:00",
            "Exceso de velocidad",
            "UR",
        ])];
        let table = process_table(&header, &rows, &doc((2025, 2, 1)), "").unwrap();
        assert_eq!(table.errors, 0);
        assert_eq!(table.offenses[0].ur, 0);
    }

    #[test]
    fn test_short_row_ignores_missing_cells() {
        let header = strings(&["Matricula", "Fecha y Hora", "Articulo", "Valor"]);
        let rows = vec![strings(&["SBF1234", "01/01/2025 10:00", "Exceso de velocidad"])];
        let table = process_table(&header, &rows, &doc((2025, 2, 1)), "").unwrap();
        assert_eq!(table.errors, 0);
        assert_eq!(table.offenses[0].ur, 0);
    }

    #[test]
    fn test_description_colon_prefix_trimmed() {
        let header = strings(&["Matricula", "Fecha y Hora", "Detalle"]);
        let rows = vec![strings(&["SBF1234", "01/01/2025 10:00", ": No respetar cartel de pare"])];
        let table = process_table(&header, &rows, &doc((2025, 2, 1)), "").unwrap();
        assert_eq!(table.offenses[0].description, "No respetar cartel de pare");
    }
}
