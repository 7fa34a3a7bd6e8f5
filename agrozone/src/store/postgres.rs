//! Store PostGIS
//!
//! Les enregistrements sont chargés par COPY dans une staging temporaire
//! (`_staging_<table>`, une par transaction) puis fusionnés avec `ON CONFLICT DO NOTHING`.
//! Les requêtes de tuiles délèguent le filtrage et la simplification à PostGIS.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use deadpool_postgres::Pool;
use futures::SinkExt;
use geo::Geometry;
use geozero::wkb::Wkb;
use geozero::wkt::WktWriter;
use geozero::{GeozeroGeometry, ToGeo};
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;
use tracing::{debug, info, warn};

use super::{FeatureSource, RecordStore};
use crate::model::{ParcelRecord, ZoneRecord};
use crate::normalize::LandArea;
use crate::tiles::query::{Layer, TileFeature, TilePlan};

const EWKT_PREFIX: &[u8] = b"SRID=4326;";

const ZONE_COLUMNS: &[&str] = &[
    "code",
    "name",
    "classification",
    "status",
    "area_ha",
    "area_rai",
    "centroid",
    "attributes",
    "source_table",
    "geometry",
];

const PARCEL_COLUMNS: &[&str] = &[
    "code",
    "zone_code",
    "owner_name",
    "owner_id",
    "crop_type",
    "area_ha",
    "area_rai",
    "centroid",
    "attributes",
    "agronomy",
    "source_table",
    "geometry",
];

/// Store PostGIS adossé à un pool deadpool
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
    schema: String,
}

impl PgStore {
    pub fn new(pool: Pool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Crée le schéma, les tables de couches et leurs index spatiaux
    pub async fn init_schema(&self, drop_existing: bool) -> Result<()> {
        let client = self.pool.get().await?;
        let schema = &self.schema;

        if drop_existing {
            client
                .execute(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema), &[])
                .await
                .context("Failed to drop schema")?;
        }

        client
            .execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema), &[])
            .await
            .context("Failed to create schema")?;

        // L'extension peut exister sans que l'utilisateur ait le droit de la créer
        if let Err(e) = client
            .execute("CREATE EXTENSION IF NOT EXISTS postgis", &[])
            .await
        {
            warn!("CREATE EXTENSION postgis failed (will check if already installed): {e}");
            let exists = client
                .query_opt("SELECT 1 FROM pg_extension WHERE extname = 'postgis'", &[])
                .await
                .context("Failed to check pg_extension")?
                .is_some();
            if !exists {
                anyhow::bail!("PostGIS extension is not installed and could not be created: {e}");
            }
        }

        for (table, ddl) in table_definitions() {
            let sql = format!("CREATE TABLE IF NOT EXISTS {}.{} ({})", schema, table, ddl);
            client
                .execute(&sql, &[])
                .await
                .with_context(|| format!("Failed to create table {}.{}", schema, table))?;

            client
                .execute(
                    &format!(
                        "CREATE INDEX IF NOT EXISTS idx_{}_{}_geom ON {}.{} USING GIST (geometry)",
                        schema, table, schema, table
                    ),
                    &[],
                )
                .await
                .with_context(|| format!("Failed to create geometry index on {}.{}", schema, table))?;

            info!(table = %format!("{}.{}", schema, table), "Table ready");
        }

        client
            .execute(
                &format!(
                    "CREATE INDEX IF NOT EXISTS idx_{}_parcels_zone ON {}.parcels (zone_code)",
                    schema, schema
                ),
                &[],
            )
            .await
            .context("Failed to create zone_code index on parcels")?;

        Ok(())
    }

    /// COPY des lignes dans une staging temporaire puis fusion dans la table finale
    ///
    /// La staging est propre à la transaction (`ON COMMIT DROP`) : deux lots
    /// concurrents sur la même table ne partagent rien.
    async fn copy_and_merge(
        &self,
        table: &str,
        columns: &[&str],
        conflict: &str,
        data: Bytes,
    ) -> Result<u64> {
        let mut client = self.pool.get().await?;
        let schema = &self.schema;
        let staging = staging_table_name(table);

        let tx = client
            .transaction()
            .await
            .context("Failed to open transaction")?;

        tx.execute(&staging_ddl(schema, table), &[])
            .await
            .with_context(|| format!("Failed to create staging table {}", staging))?;

        let copy_sql = format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT csv, DELIMITER '|', QUOTE '\"', ESCAPE '\"', NULL '')",
            staging,
            columns.join(", ")
        );
        let sink = tx
            .copy_in(&copy_sql)
            .await
            .with_context(|| format!("Failed to start COPY into {}", staging))?;
        let mut sink = std::pin::pin!(sink);
        sink.as_mut()
            .send(data)
            .await
            .context("Failed to send COPY data")?;
        let copied = sink.as_mut().finish().await.context("Failed to finish COPY")?;

        let column_list = columns.join(", ");
        let merge = format!(
            "INSERT INTO {schema}.{table} ({column_list}) \
             SELECT {column_list} FROM {staging} \
             ON CONFLICT ({conflict}) DO NOTHING"
        );
        let inserted = tx
            .execute(&merge, &[])
            .await
            .with_context(|| format!("Failed to merge staging into {}.{}", schema, table))?;

        tx.commit().await.context("Failed to commit")?;

        debug!(table, copied, inserted, "Staging merged");
        Ok(inserted)
    }

    async fn fetch_rows(&self, plan: &TilePlan) -> Result<Vec<Row>> {
        let client = self.pool.get().await?;
        let bounds = plan.scope_bounds();
        let (west, south, east, north) = (bounds.min().x, bounds.min().y, bounds.max().x, bounds.max().y);

        let mut params: Vec<Box<dyn ToSql + Sync + Send>> =
            vec![Box::new(west), Box::new(south), Box::new(east), Box::new(north)];

        let geometry_expr = if plan.tolerance > 0.0 {
            params.push(Box::new(plan.tolerance));
            format!("ST_SimplifyPreserveTopology(geometry, ${})", params.len())
        } else {
            "geometry".to_string()
        };

        let mut filter = if plan.layer.is_point() {
            "ST_Contains(ST_MakeEnvelope($1, $2, $3, $4, 4326), geometry)".to_string()
        } else {
            "geometry && ST_MakeEnvelope($1, $2, $3, $4, 4326) \
             AND ST_Intersects(geometry, ST_MakeEnvelope($1, $2, $3, $4, 4326))"
                .to_string()
        };
        if let Some(min_area) = plan.min_area {
            params.push(Box::new(min_area));
            filter.push_str(&format!(" AND ST_Area(geometry::geography) >= ${}", params.len()));
        }

        let sql = format!(
            "SELECT id, {}, ST_AsBinary({}) AS wkb FROM {}.{} WHERE {} ORDER BY id",
            select_columns(plan.layer),
            geometry_expr,
            self.schema,
            plan.layer.as_str(),
            filter
        );

        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        client
            .query(&sql, &refs)
            .await
            .with_context(|| format!("Tile query failed on {}.{}", self.schema, plan.layer))
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn save_zones(&self, zones: &[ZoneRecord]) -> Result<u64> {
        if zones.is_empty() {
            return Ok(0);
        }
        let mut buf = BytesMut::with_capacity(zones.len() * 512);
        let mut wkt_buf = Vec::with_capacity(1024);
        for zone in zones {
            if let Err(e) = write_zone_row(&mut buf, zone, &mut wkt_buf) {
                warn!(zone = %zone.code, error = %e, "Zone row skipped");
            }
        }
        self.copy_and_merge("zones", ZONE_COLUMNS, "code", buf.freeze())
            .await
    }

    async fn save_parcels(&self, parcels: &[ParcelRecord]) -> Result<u64> {
        if parcels.is_empty() {
            return Ok(0);
        }
        let mut buf = BytesMut::with_capacity(parcels.len() * 512);
        let mut wkt_buf = Vec::with_capacity(1024);
        for parcel in parcels {
            if let Err(e) = write_parcel_row(&mut buf, parcel, &mut wkt_buf) {
                warn!(parcel = %parcel.code, error = %e, "Parcel row skipped");
            }
        }
        self.copy_and_merge("parcels", PARCEL_COLUMNS, "zone_code, code", buf.freeze())
            .await
    }

    async fn refresh_zone_statistics(&self) -> Result<u64> {
        let client = self.pool.get().await?;
        let sql = format!(
            r#"
            UPDATE {schema}.zones z
            SET parcel_count = s.parcel_count,
                parcel_area_ha = s.parcel_area_ha,
                parcel_area_rai = s.parcel_area_ha * {rai}
            FROM (
                SELECT zz.code,
                       COUNT(p.id) AS parcel_count,
                       COALESCE(SUM(p.area_ha), 0) AS parcel_area_ha
                FROM {schema}.zones zz
                LEFT JOIN {schema}.parcels p ON p.zone_code = zz.code
                GROUP BY zz.code
            ) s
            WHERE z.code = s.code
            "#,
            schema = self.schema,
            rai = LandArea::RAI_PER_HECTARE
        );
        let updated = client
            .execute(&sql, &[])
            .await
            .context("Failed to refresh zone statistics")?;
        Ok(updated)
    }
}

#[async_trait]
impl FeatureSource for PgStore {
    async fn fetch(&self, plan: &TilePlan) -> Result<Vec<TileFeature>> {
        let rows = self.fetch_rows(plan).await?;
        let mut features = Vec::with_capacity(rows.len());
        for row in rows {
            match row_to_feature(plan.layer, &row) {
                Ok(feature) => features.push(feature),
                Err(e) => warn!(layer = %plan.layer, error = %e, "Tile row skipped"),
            }
        }
        debug!(layer = %plan.layer, scope = %plan.scope, features = features.len(), "Tile features fetched");
        Ok(features)
    }
}

fn table_definitions() -> [(&'static str, &'static str); 5] {
    [
        (
            "zones",
            r#"
            id BIGSERIAL PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT,
            classification TEXT,
            status TEXT,
            area_ha DOUBLE PRECISION NOT NULL,
            area_rai DOUBLE PRECISION NOT NULL,
            parcel_count BIGINT NOT NULL DEFAULT 0,
            parcel_area_ha DOUBLE PRECISION NOT NULL DEFAULT 0,
            parcel_area_rai DOUBLE PRECISION NOT NULL DEFAULT 0,
            centroid geometry(Point, 4326),
            attributes JSONB,
            source_table TEXT,
            geometry geometry(Geometry, 4326) NOT NULL,
            created_at TIMESTAMPTZ DEFAULT NOW()
            "#,
        ),
        (
            "parcels",
            r#"
            id BIGSERIAL PRIMARY KEY,
            code TEXT NOT NULL,
            zone_code TEXT NOT NULL,
            owner_name TEXT,
            owner_id TEXT,
            crop_type TEXT,
            area_ha DOUBLE PRECISION NOT NULL,
            area_rai DOUBLE PRECISION NOT NULL,
            centroid geometry(Point, 4326),
            attributes JSONB,
            agronomy JSONB,
            source_table TEXT,
            geometry geometry(Polygon, 4326) NOT NULL,
            created_at TIMESTAMPTZ DEFAULT NOW(),
            CONSTRAINT parcels_zone_code_unique UNIQUE (zone_code, code)
            "#,
        ),
        (
            "canals",
            r#"
            id BIGSERIAL PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT,
            kind TEXT,
            capacity DOUBLE PRECISION,
            geometry geometry(Geometry, 4326) NOT NULL
            "#,
        ),
        (
            "gates",
            r#"
            id BIGSERIAL PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT,
            kind TEXT,
            status TEXT,
            geometry geometry(Point, 4326) NOT NULL
            "#,
        ),
        (
            "pumps",
            r#"
            id BIGSERIAL PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT,
            kind TEXT,
            status TEXT,
            geometry geometry(Point, 4326) NOT NULL
            "#,
        ),
    ]
}

fn staging_table_name(table: &str) -> String {
    format!("_staging_{}", table)
}

/// Table temporaire de la transaction, calquée sur la table finale
fn staging_ddl(schema: &str, table: &str) -> String {
    format!(
        "CREATE TEMP TABLE {} (LIKE {}.{} INCLUDING DEFAULTS) ON COMMIT DROP",
        staging_table_name(table),
        schema,
        table
    )
}

fn select_columns(layer: Layer) -> &'static str {
    match layer {
        Layer::Zones => "code, name, area_ha, classification, status",
        Layer::Parcels => "code, area_ha, crop_type, owner_name",
        Layer::Canals => "code, name, kind, capacity",
        Layer::Gates | Layer::Pumps => "code, name, kind, status",
    }
}

fn row_to_feature(layer: Layer, row: &Row) -> Result<TileFeature> {
    let id: i64 = row.try_get("id")?;
    let wkb: Vec<u8> = row.try_get("wkb")?;
    let geometry = Wkb(wkb)
        .to_geo()
        .map_err(|e| anyhow::anyhow!("Failed to decode WKB: {e}"))?;

    let code: String = row.try_get("code")?;
    let feature = TileFeature::new(id as u64, geometry);
    let feature = match layer {
        Layer::Zones => feature
            .with_text("code", Some(code.as_str()))
            .with_text("name", row.try_get::<_, Option<String>>("name")?.as_deref())
            .with_number("area", row.try_get("area_ha")?)
            .with_text("type", row.try_get::<_, Option<String>>("classification")?.as_deref())
            .with_text("status", row.try_get::<_, Option<String>>("status")?.as_deref()),
        Layer::Parcels => feature
            .with_integer("id", id)
            .with_text("code", Some(code.as_str()))
            .with_number("area", row.try_get("area_ha")?)
            .with_text("crop", row.try_get::<_, Option<String>>("crop_type")?.as_deref())
            .with_text("farmer", row.try_get::<_, Option<String>>("owner_name")?.as_deref()),
        Layer::Canals => feature
            .with_integer("id", id)
            .with_text("code", Some(code.as_str()))
            .with_text("name", row.try_get::<_, Option<String>>("name")?.as_deref())
            .with_text("type", row.try_get::<_, Option<String>>("kind")?.as_deref())
            .with_number("capacity", row.try_get("capacity")?),
        Layer::Gates | Layer::Pumps => feature
            .with_integer("id", id)
            .with_text("code", Some(code.as_str()))
            .with_text("name", row.try_get::<_, Option<String>>("name")?.as_deref())
            .with_text("type", row.try_get::<_, Option<String>>("kind")?.as_deref())
            .with_text("status", row.try_get::<_, Option<String>>("status")?.as_deref()),
    };
    Ok(feature)
}

pub(crate) fn push_csv_text_field(buf: &mut BytesMut, value: &str) {
    buf.extend_from_slice(b"\"");
    for b in value.as_bytes() {
        match *b {
            b'"' => buf.extend_from_slice(b"\"\""),
            b'\n' | b'\r' => buf.extend_from_slice(b" "),
            _ => buf.extend_from_slice(&[*b]),
        }
    }
    buf.extend_from_slice(b"\"");
}

fn push_optional_text(buf: &mut BytesMut, value: Option<&str>) {
    if let Some(v) = value {
        push_csv_text_field(buf, v);
    }
}

fn push_number(buf: &mut BytesMut, value: f64) {
    if value.is_finite() {
        buf.extend_from_slice(value.to_string().as_bytes());
    }
}

/// Géométrie en EWKT (`SRID=4326;WKT`), entre guillemets CSV
fn push_ewkt(buf: &mut BytesMut, geometry: &Geometry, wkt_buf: &mut Vec<u8>) -> Result<()> {
    wkt_buf.clear();
    {
        let mut writer = WktWriter::new(&mut *wkt_buf);
        geometry
            .process_geom(&mut writer)
            .context("Failed to encode geometry to WKT")?;
    }
    buf.extend_from_slice(b"\"");
    buf.extend_from_slice(EWKT_PREFIX);
    buf.extend_from_slice(&wkt_buf[..]);
    buf.extend_from_slice(b"\"");
    Ok(())
}

fn push_json<T: serde::Serialize>(buf: &mut BytesMut, value: &T) -> Result<()> {
    let json = serde_json::to_string(value).context("Failed to serialize JSON column")?;
    push_csv_text_field(buf, &json);
    Ok(())
}

/// Écrit une ligne CSV ; en cas d'erreur le buffer est restauré
fn write_row<F>(buf: &mut BytesMut, write: F) -> Result<()>
where
    F: FnOnce(&mut BytesMut) -> Result<()>,
{
    let start_len = buf.len();
    let res = write(buf);
    match res {
        Ok(()) => {
            buf.extend_from_slice(b"\n");
            Ok(())
        }
        Err(e) => {
            buf.truncate(start_len);
            Err(e)
        }
    }
}

fn write_zone_row(buf: &mut BytesMut, zone: &ZoneRecord, wkt_buf: &mut Vec<u8>) -> Result<()> {
    write_row(buf, |buf| {
        push_csv_text_field(buf, &zone.code);
        buf.extend_from_slice(b"|");
        push_optional_text(buf, zone.name.as_deref());
        buf.extend_from_slice(b"|");
        push_optional_text(buf, zone.classification.as_deref());
        buf.extend_from_slice(b"|");
        push_optional_text(buf, zone.status.as_deref());
        buf.extend_from_slice(b"|");
        push_number(buf, zone.area.hectares());
        buf.extend_from_slice(b"|");
        push_number(buf, zone.area.rai());
        buf.extend_from_slice(b"|");
        push_ewkt(buf, &Geometry::Point(zone.centroid), wkt_buf)?;
        buf.extend_from_slice(b"|");
        push_json(buf, &zone.attributes)?;
        buf.extend_from_slice(b"|");
        push_csv_text_field(buf, &zone.source_table);
        buf.extend_from_slice(b"|");
        push_ewkt(buf, &zone.geometry, wkt_buf)
    })
}

fn write_parcel_row(buf: &mut BytesMut, parcel: &ParcelRecord, wkt_buf: &mut Vec<u8>) -> Result<()> {
    write_row(buf, |buf| {
        push_csv_text_field(buf, &parcel.code);
        buf.extend_from_slice(b"|");
        push_csv_text_field(buf, &parcel.zone_code);
        buf.extend_from_slice(b"|");
        push_optional_text(buf, parcel.owner_name.as_deref());
        buf.extend_from_slice(b"|");
        push_optional_text(buf, parcel.owner_id.as_deref());
        buf.extend_from_slice(b"|");
        push_optional_text(buf, parcel.crop_type.as_deref());
        buf.extend_from_slice(b"|");
        push_number(buf, parcel.area.hectares());
        buf.extend_from_slice(b"|");
        push_number(buf, parcel.area.rai());
        buf.extend_from_slice(b"|");
        push_ewkt(buf, &Geometry::Point(parcel.centroid), wkt_buf)?;
        buf.extend_from_slice(b"|");
        push_json(buf, &parcel.attributes)?;
        buf.extend_from_slice(b"|");
        if !parcel.agronomy.is_empty() {
            push_json(buf, &parcel.agronomy)?;
        }
        buf.extend_from_slice(b"|");
        push_csv_text_field(buf, &parcel.source_table);
        buf.extend_from_slice(b"|");
        push_ewkt(buf, &parcel.geometry, wkt_buf)
    })
}
