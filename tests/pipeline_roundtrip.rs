//! End-to-end extraction round-trip against a real on-disk store.
//!
//! Covers the path the `update` command takes after download: stored
//! gzip document → extractor → offense repository, including enrichment
//! from curated tables and full-replace idempotence on re-extraction.

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::Utc;

use impo::models::{DescriptionClassification, LocationJudgment};
use impo::repository::OffenseRepository;
use impo::scrapers::extract::{ExtractOptions, Extractor, Persister};
use impo::sources;
use impo::storage::FileStore;

const HREF: &str = "https://www.impo.com.uy/bases/notificaciones-maldonado/1-2025";

const DOCUMENT: &str = r#"<html><head>
<title>Notificación Dirección General de Tránsito y Transporte Intendencia de Maldonado N° 1/025</title>
</head><body>
<h5>Fecha de Publicación: 01/02/2025</h5>
<table class="tabla_en_texto">
<tr><td>Matricula</td><td>Fecha y Hora</td><td>Interseccion</td>
<td>Intervenido</td><td>Articulo</td><td>Valor en UR</td></tr>
<tr><td>ZME2015</td><td>01/01/2025 00:00</td>
<td>Ruta Interbalnearia y Rosa de los Vientos</td><td>IDM 0000000000</td>
<td>Exceso de velocidad hasta 20 km/h</td><td>5</td></tr>
<tr><td>BEC0042</td><td>02/01/2025 15:30</td>
<td>Camino de los Gauchos y Bulevar Artigas</td><td>IDM 0000000001</td>
<td>No respetar senda peatonal</td><td>2,5</td></tr>
</table>
</body></html>"#;

fn seed_store(dir: &std::path::Path) -> Arc<FileStore> {
    let db = sources::find("Maldonado").unwrap();
    let store = Arc::new(FileStore::new(dir, db));
    store
        .upsert(
            &[impo::models::DocumentIndexEntry {
                href: HREF.to_string(),
                title: "Notificación 1/025".to_string(),
                subtitle: String::new(),
            }],
            false,
        )
        .unwrap();
    store.save_document(HREF, DOCUMENT.as_bytes()).unwrap();
    store
}

async fn extract_all(
    store: &Arc<FileStore>,
    repository: &Arc<OffenseRepository>,
    full: bool,
) -> impo::scrapers::extract::ExtractMetrics {
    let db = sources::find("Maldonado").unwrap();
    let extractor = Extractor::new(
        Arc::clone(store),
        Arc::clone(repository) as Arc<dyn Persister>,
        db,
        Arc::new(HashSet::new()),
        ExtractOptions {
            full,
            max_procs: 2,
            ..ExtractOptions::default()
        },
    );
    extractor
        .run(Arc::new(AtomicBool::new(false)))
        .await
        .unwrap()
}

#[tokio::test]
async fn extracts_stored_document_into_repository() {
    let dir = tempfile::tempdir().unwrap();
    let store = seed_store(dir.path());
    let repository = Arc::new(OffenseRepository::new(&dir.path().join("impo.db")).unwrap());

    let metrics = extract_all(&store, &repository, false).await;
    assert_eq!(metrics.docs_ok, 1);
    assert_eq!(metrics.docs_err, 0);
    assert_eq!(metrics.offenses, 2);

    let rows = repository.offenses_for_doc(HREF).unwrap();
    assert_eq!(rows.len(), 2);

    let first = &rows[0];
    assert_eq!(first.doc_id, "1/025");
    assert_eq!(first.record_id, 1);
    assert_eq!(first.vehicle, "ZME2015");
    assert_eq!(first.offense_id.as_deref(), Some("IDM 0000000000"));
    assert_eq!(
        first.location.as_deref(),
        Some("Ruta Interbalnearia y Rosa de los Vientos")
    );
    assert_eq!(
        first.description.as_deref(),
        Some("Exceso de velocidad hasta 20 km/h")
    );
    assert_eq!(first.ur, 500);
    assert_eq!(first.error, "");
    assert_eq!(first.time_year, Some(2025));
    // Plate analysis verdict is stored with the row.
    assert_eq!(first.country.as_deref(), Some("UY"));
    assert!(first.mercosur);

    let second = &rows[1];
    assert_eq!(second.record_id, 2);
    assert_eq!(second.vehicle, "BEC0042");
    assert_eq!(second.adm_division.as_deref(), Some("MA"));
    assert_eq!(second.ur, 250);
}

#[tokio::test]
async fn reextraction_is_a_full_replace() {
    let dir = tempfile::tempdir().unwrap();
    let store = seed_store(dir.path());
    let repository = Arc::new(OffenseRepository::new(&dir.path().join("impo.db")).unwrap());

    // Incremental run skips documents already in the store.
    extract_all(&store, &repository, false).await;
    let metrics = extract_all(&store, &repository, false).await;
    assert_eq!(metrics.docs_ok, 0);
    assert_eq!(repository.total_offenses().unwrap(), 2);

    // A full run replaces the rows wholesale, leaving the set identical.
    let metrics = extract_all(&store, &repository, true).await;
    assert_eq!(metrics.docs_ok, 1);
    assert_eq!(repository.total_offenses().unwrap(), 2);

    let rows = repository.offenses_for_doc(HREF).unwrap();
    let vehicles: Vec<&str> = rows.iter().map(|r| r.vehicle.as_str()).collect();
    assert_eq!(vehicles, vec!["ZME2015", "BEC0042"]);
}

#[tokio::test]
async fn split_date_time_and_locality_columns() {
    let dir = tempfile::tempdir().unwrap();
    let db = sources::find("Lavalleja").unwrap();
    let store = Arc::new(FileStore::new(dir.path(), db));
    let href = "https://www.impo.com.uy/bases/notificaciones-lavalleja/10-2024";

    let document = r#"<html><head>
<title>Notificación Intendencia de Lavalleja N° 10/024</title>
</head><body>
<h5>Fecha de Publicación: 15/04/2024</h5>
<table class="tabla_en_texto">
<tr><td>MATRICULA</td><td>INFRACCION</td><td>VALOR</td><td>FECHA</td>
<td>HORA</td><td>UBICACIÓN</td><td>LOCALIDAD</td></tr>
<tr><td>ABE 8658</td><td>ADELANTAR POR LA DERECHA</td><td>3</td><td>31/03/2024</td>
<td>17:27</td><td>L.A. DE HERRERA Y LAVALLEJA</td><td>MINAS</td></tr>
</table>
</body></html>"#;

    store
        .upsert(
            &[impo::models::DocumentIndexEntry {
                href: href.to_string(),
                title: "Notificación 10/024".to_string(),
                subtitle: String::new(),
            }],
            false,
        )
        .unwrap();
    store.save_document(href, document.as_bytes()).unwrap();

    let repository = Arc::new(OffenseRepository::new(&dir.path().join("impo.db")).unwrap());
    let extractor = Extractor::new(
        Arc::clone(&store),
        Arc::clone(&repository) as Arc<dyn Persister>,
        db,
        Arc::new(HashSet::new()),
        ExtractOptions {
            max_procs: 1,
            ..ExtractOptions::default()
        },
    );
    let metrics = extractor
        .run(Arc::new(AtomicBool::new(false)))
        .await
        .unwrap();
    assert_eq!(metrics.docs_ok, 1);
    assert_eq!(metrics.offenses, 1);

    let rows = repository.offenses_for_doc(href).unwrap();
    let row = &rows[0];
    assert_eq!(row.vehicle, "ABE8658");
    assert!(row.time.as_deref().unwrap().starts_with("2024-03-31T17:27"));
    assert_eq!(
        row.location.as_deref(),
        Some("L.A. DE HERRERA Y LAVALLEJA, MINAS")
    );
    assert_eq!(row.ur, 300);
    assert_eq!(row.error, "");
    assert_eq!(row.description.as_deref(), Some("ADELANTAR POR LA DERECHA"));
}

#[tokio::test]
async fn sucive_prose_supplies_the_description() {
    let dir = tempfile::tempdir().unwrap();
    let db = sources::find("Montevideo").unwrap();
    let store = Arc::new(FileStore::new(dir.path(), db));
    let href = "https://www.impo.com.uy/bases/notificaciones-mdeo/2025/1412";

    let document = r#"<html><head>
<title>Notificación Intendencia de Montevideo N° 1412/025</title>
</head><body>
<h5>Fecha de Publicación: 20/12/2025</h5>
<p>En uso de las facultades conferidas, se constató la contravención a lo
dispuesto en el art. 9 del Texto Ordenado del Sucive por parte de los
titulares de los vehículos que se detallan.</p>
<table class="tabla_en_texto">
<tr><td>Matricula</td><td>Fecha y Hora</td></tr>
<tr><td>SBF1234</td><td>10/12/2025 10:00</td></tr>
</table>
</body></html>"#;

    store
        .upsert(
            &[impo::models::DocumentIndexEntry {
                href: href.to_string(),
                title: "Notificación 1412/025".to_string(),
                subtitle: String::new(),
            }],
            false,
        )
        .unwrap();
    store.save_document(href, document.as_bytes()).unwrap();

    let repository = Arc::new(OffenseRepository::new(&dir.path().join("impo.db")).unwrap());
    let extractor = Extractor::new(
        Arc::clone(&store),
        Arc::clone(&repository) as Arc<dyn Persister>,
        db,
        Arc::new(HashSet::new()),
        ExtractOptions {
            max_procs: 1,
            ..ExtractOptions::default()
        },
    );
    let metrics = extractor
        .run(Arc::new(AtomicBool::new(false)))
        .await
        .unwrap();
    assert_eq!(metrics.docs_ok, 1);

    let rows = repository.offenses_for_doc(href).unwrap();
    assert_eq!(rows[0].doc_id, "1412/025");
    assert_eq!(
        rows[0].description.as_deref(),
        Some("Cobros por acciones, trámites o gestiones")
    );
    assert_eq!(rows[0].error, "");
}

#[tokio::test]
async fn curated_tables_enrich_extracted_rows() {
    let dir = tempfile::tempdir().unwrap();
    let store = seed_store(dir.path());

    // Curation data is in place before the repository loads its caches.
    {
        let repository = OffenseRepository::new(&dir.path().join("impo.db")).unwrap();
        repository
            .import_locations(&[LocationJudgment {
                db_id: 2,
                location: "Ruta Interbalnearia y Rosa de los Vientos".to_string(),
                lat: -34.88,
                lng: -54.95,
                is_electronic: true,
                method: "radar".to_string(),
                confidence: 1.0,
                notes: String::new(),
                canonical_location: Some("Ruta Interbalnearia km 115".to_string()),
                h3_cells: [0; 8],
            }])
            .unwrap();
        repository
            .import_descriptions(&[DescriptionClassification {
                description: "Exceso de velocidad hasta 20 km/h".to_string(),
                article_ids: vec!["13.3.A".to_string()],
                article_codes: vec![13],
                updated_at: Utc::now(),
            }])
            .unwrap();
    }

    let repository = Arc::new(OffenseRepository::new(&dir.path().join("impo.db")).unwrap());
    extract_all(&store, &repository, false).await;

    let rows = repository.offenses_for_doc(HREF).unwrap();
    let first = &rows[0];
    assert_eq!(first.location.as_deref(), Some("Ruta Interbalnearia km 115"));
    assert_eq!(
        first.display_location.as_deref(),
        Some("Ruta Interbalnearia y Rosa de los Vientos")
    );
    assert_eq!(first.lat, Some(-34.88));
    assert!(first.h3_res1.is_some());
    assert!(first.h3_res8.is_some());
    assert_eq!(first.article_ids_json.as_deref(), Some(r#"["13.3.A"]"#));
    assert_eq!(first.article_codes_json.as_deref(), Some("[13]"));

    // The second row's location has no judgment; it stays unenriched.
    assert_eq!(rows[1].lat, None);
    assert_eq!(rows[1].display_location, None);
}
