use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::{AnyArguments, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, AnyPool, Row};
use uuid::Uuid;

use crate::model::{
    FamilyKey, Lifecycle, Listing, ListingCounts, Relation, Reservation, TermWindow,
};
use crate::store::repository::{FamilyRecords, FamilyWrite, LedgerRepository, ListingWrite};
use crate::store::upsert::Upsert;

const RESERVATION_COLUMNS: &[&str] = &[
    "reservation_id",
    "region",
    "scope",
    "az",
    "instance_type",
    "instance_family",
    "units",
    "offer_class",
    "offer_type",
    "product",
    "tenancy",
    "state",
    "duration_secs",
    "start_date",
    "end_date",
    "original_end_date",
    "instance_count",
    "upfront_price",
    "recurring_charges",
    "effective_price",
    "lifecycle",
    "listed_on",
    "created_at",
    "updated_at",
];

const RESERVATION_UPSERT: Upsert<'static> = Upsert {
    table: "reservations",
    columns: RESERVATION_COLUMNS,
    conflict: &["reservation_id"],
    // Everything except the id and the first-seen timestamp.
    overwrite: &[
        "region",
        "scope",
        "az",
        "instance_type",
        "instance_family",
        "units",
        "offer_class",
        "offer_type",
        "product",
        "tenancy",
        "state",
        "duration_secs",
        "start_date",
        "end_date",
        "original_end_date",
        "instance_count",
        "upfront_price",
        "recurring_charges",
        "effective_price",
        "lifecycle",
        "listed_on",
        "updated_at",
    ],
};

const RELATION_UPSERT: Upsert<'static> = Upsert {
    table: "reservations_relations",
    columns: &["parent_id", "child_id", "created_at"],
    conflict: &["parent_id", "child_id"],
    overwrite: &[],
};

const LISTING_COLUMNS: &[&str] = &[
    "listing_id",
    "reservation_id",
    "region",
    "scope",
    "az",
    "instance_type",
    "instance_family",
    "units",
    "product",
    "published_at",
    "status",
    "status_message",
    "available",
    "sold",
    "cancelled",
    "pending",
    "created_at",
    "updated_at",
];

const LISTING_UPSERT: Upsert<'static> = Upsert {
    table: "reservations_listings",
    columns: LISTING_COLUMNS,
    conflict: &["listing_id"],
    overwrite: &[
        "status",
        "status_message",
        "available",
        "sold",
        "cancelled",
        "pending",
        "updated_at",
    ],
};

const TERM_UPSERT: Upsert<'static> = Upsert {
    table: "reservations_listings_terms",
    columns: &[
        "listing_id",
        "start_date",
        "end_date",
        "term",
        "upfront_price",
        "units_sold",
        "created_at",
        "updated_at",
    ],
    conflict: &["listing_id", "start_date"],
    overwrite: &["end_date", "term", "upfront_price", "units_sold", "updated_at"],
};

const FAMILY_FILTER_BOUND: &str = "region = ? AND duration_secs = ? AND offer_class = ? \
     AND instance_family = ? AND offer_type = ? AND product = ? AND tenancy = ?";

const FAMILY_FILTER_CONVERTIBLE: &str = "region = ? AND duration_secs = ? AND offer_class = ?";

/// SQLx-backed ledger. Owns persistence and row mapping only.
pub struct SqlxLedgerRepository {
    pool: AnyPool,
}

impl SqlxLedgerRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerRepository for SqlxLedgerRepository {
    async fn fetch_family(&self, key: &FamilyKey) -> anyhow::Result<FamilyRecords> {
        let filter = if key.is_attribute_bound() {
            FAMILY_FILTER_BOUND
        } else {
            FAMILY_FILTER_CONVERTIBLE
        };

        let sql = format!(
            "SELECT {} FROM reservations WHERE {filter} ORDER BY start_date, reservation_id;",
            RESERVATION_COLUMNS.join(", ")
        );
        let rows = bind_family(sqlx::query(&sql), key)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("fetch family {key}"))?;

        let mut reservations = Vec::with_capacity(rows.len());
        for r in &rows {
            match row_to_reservation(r) {
                Ok(res) => reservations.push(res),
                Err(e) => {
                    // poison-row resilience: skip but don't fail the family
                    tracing::warn!(error = %e, family = %key, "skipping malformed reservation row");
                }
            }
        }

        let sql = format!(
            "SELECT parent_id, child_id FROM reservations_relations \
             WHERE child_id IN (SELECT reservation_id FROM reservations WHERE {filter}) \
             ORDER BY parent_id, child_id;"
        );
        let rows = bind_family(sqlx::query(&sql), key)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("fetch relations of family {key}"))?;

        let mut relations = Vec::with_capacity(rows.len());
        for r in &rows {
            relations.push(Relation::new(
                parse_uuid(r.get("parent_id"), "parent_id")?,
                parse_uuid(r.get("child_id"), "child_id")?,
            ));
        }

        Ok(FamilyRecords {
            reservations,
            relations,
        })
    }

    async fn fetch_listing(&self, id: &Uuid) -> anyhow::Result<Option<Listing>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM reservations_listings WHERE listing_id = ?;",
            LISTING_COLUMNS.join(", ")
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_listing).transpose()
    }

    async fn fetch_listing_terms(&self, listing_id: &Uuid) -> anyhow::Result<Vec<TermWindow>> {
        let rows = sqlx::query(
            r#"
SELECT listing_id, start_date, end_date, term, upfront_price, units_sold
FROM reservations_listings_terms
WHERE listing_id = ?
ORDER BY start_date;
"#,
        )
        .bind(listing_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_term).collect()
    }

    async fn commit_family(&self, write: &FamilyWrite) -> anyhow::Result<()> {
        if write.is_empty() {
            return Ok(());
        }
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let sql = RESERVATION_UPSERT.sql();
        for r in &write.reservations {
            bind_reservation(sqlx::query(&sql), r, now)?
                .execute(&mut *tx)
                .await
                .with_context(|| format!("upsert reservation {}", r.id))?;
        }

        let sql = RELATION_UPSERT.sql();
        for rel in &write.relations {
            sqlx::query(&sql)
                .bind(rel.parent_id.to_string())
                .bind(rel.child_id.to_string())
                .bind(now)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("insert relation {} -> {}", rel.parent_id, rel.child_id))?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn commit_listing(&self, write: &ListingWrite) -> anyhow::Result<()> {
        if write.is_empty() {
            return Ok(());
        }
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        if let Some(l) = &write.listing {
            bind_listing(sqlx::query(&LISTING_UPSERT.sql()), l, now)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("upsert listing {}", l.id))?;
        }

        let sql = RESERVATION_UPSERT.sql();
        for r in &write.reservations {
            bind_reservation(sqlx::query(&sql), r, now)?
                .execute(&mut *tx)
                .await
                .with_context(|| format!("upsert reservation {}", r.id))?;
        }

        for w in &write.stale_windows {
            sqlx::query(
                "DELETE FROM reservations_listings_terms WHERE listing_id = ? AND start_date = ?;",
            )
            .bind(w.listing_id.to_string())
            .bind(w.start.timestamp())
            .execute(&mut *tx)
            .await
            .with_context(|| format!("delete stale term {} of listing {}", w.term, w.listing_id))?;
        }

        let sql = TERM_UPSERT.sql();
        for w in &write.windows {
            sqlx::query(&sql)
                .bind(w.listing_id.to_string())
                .bind(w.start.timestamp())
                .bind(w.end.timestamp())
                .bind(w.term)
                .bind(w.upfront_price)
                .bind(w.units_sold)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("upsert term {} of listing {}", w.term, w.listing_id))?;
        }

        tx.commit().await?;
        Ok(())
    }
}

/* =========================
Binding
========================= */

type AnyQuery<'q> = Query<'q, Any, AnyArguments<'q>>;

fn bind_family<'q>(q: AnyQuery<'q>, key: &FamilyKey) -> AnyQuery<'q> {
    let q = q
        .bind(key.region.clone())
        .bind(key.duration_secs)
        .bind(key.offer_class.as_str());

    if !key.is_attribute_bound() {
        return q;
    }
    q.bind(key.instance_family.clone().unwrap_or_default())
        .bind(key.offer_type.clone().unwrap_or_default())
        .bind(key.product.clone().unwrap_or_default())
        .bind(key.tenancy.clone().unwrap_or_default())
}

fn bind_reservation<'q>(
    q: AnyQuery<'q>,
    r: &Reservation,
    now: i64,
) -> anyhow::Result<AnyQuery<'q>> {
    let listed_on = serde_json::to_string(&r.listed_on).context("encode listed_on")?;

    Ok(q.bind(r.id.to_string())
        .bind(r.region.clone())
        .bind(r.scope.as_str())
        .bind(r.az.clone())
        .bind(r.instance_type.clone())
        .bind(r.instance_family.clone())
        .bind(r.units)
        .bind(r.offer_class.as_str())
        .bind(r.offer_type.clone())
        .bind(r.product.clone())
        .bind(r.tenancy.clone())
        .bind(r.state.clone())
        .bind(r.duration_secs)
        .bind(r.start.timestamp())
        .bind(r.end.timestamp())
        .bind(r.original_end.map(|d| d.timestamp()))
        .bind(r.count)
        .bind(r.upfront_price)
        .bind(r.recurring_charges)
        .bind(r.effective_price)
        .bind(i64::from(r.lifecycle.bits()))
        .bind(listed_on)
        .bind(now)
        .bind(now))
}

fn bind_listing<'q>(q: AnyQuery<'q>, l: &Listing, now: i64) -> AnyQuery<'q> {
    q.bind(l.id.to_string())
        .bind(l.source_reservation_id.to_string())
        .bind(l.region.clone())
        .bind(l.scope.as_str())
        .bind(l.az.clone())
        .bind(l.instance_type.clone())
        .bind(l.instance_family.clone())
        .bind(l.units)
        .bind(l.product.clone())
        .bind(l.published.timestamp())
        .bind(l.status.clone())
        .bind(l.status_message.clone())
        .bind(l.counts.available)
        .bind(l.counts.sold)
        .bind(l.counts.cancelled)
        .bind(l.counts.pending)
        .bind(now)
        .bind(now)
}

/* =========================
Row mapping + conversions
========================= */

fn row_to_reservation(r: &AnyRow) -> anyhow::Result<Reservation> {
    let id = parse_uuid(r.get("reservation_id"), "reservation_id")?;

    let listed_on: Vec<Uuid> =
        serde_json::from_str(&r.get::<String, _>("listed_on")).context("invalid listed_on")?;

    Ok(Reservation {
        id,
        region: r.get("region"),
        scope: r
            .get::<String, _>("scope")
            .parse()
            .map_err(|e: String| anyhow!(e))?,
        az: r.get("az"),
        instance_type: r.get("instance_type"),
        instance_family: r.get("instance_family"),
        units: r.get::<f64, _>("units"),
        offer_class: r
            .get::<String, _>("offer_class")
            .parse()
            .map_err(|e: String| anyhow!(e))?,
        offer_type: r.get("offer_type"),
        product: r.get("product"),
        tenancy: r.get("tenancy"),
        state: r.get("state"),
        duration_secs: r.get::<i64, _>("duration_secs"),
        start: from_unix(r.get("start_date"))?,
        end: from_unix(r.get("end_date"))?,
        original_end: r
            .get::<Option<i64>, _>("original_end_date")
            .map(from_unix)
            .transpose()?,
        count: r.get::<i64, _>("instance_count"),
        upfront_price: r.get::<i64, _>("upfront_price"),
        recurring_charges: r.get::<i64, _>("recurring_charges"),
        effective_price: r.get::<i64, _>("effective_price"),
        lifecycle: Lifecycle::from_bits(i64_to_u8(r.get("lifecycle"))?),
        listed_on,
    })
}

fn row_to_listing(r: &AnyRow) -> anyhow::Result<Listing> {
    Ok(Listing {
        id: parse_uuid(r.get("listing_id"), "listing_id")?,
        source_reservation_id: parse_uuid(r.get("reservation_id"), "reservation_id")?,
        region: r.get("region"),
        scope: r
            .get::<String, _>("scope")
            .parse()
            .map_err(|e: String| anyhow!(e))?,
        az: r.get("az"),
        instance_type: r.get("instance_type"),
        instance_family: r.get("instance_family"),
        units: r.get::<f64, _>("units"),
        product: r.get("product"),
        published: from_unix(r.get("published_at"))?,
        status: r.get("status"),
        status_message: r.get("status_message"),
        counts: ListingCounts {
            available: r.get::<i64, _>("available"),
            sold: r.get::<i64, _>("sold"),
            cancelled: r.get::<i64, _>("cancelled"),
            pending: r.get::<i64, _>("pending"),
        },
    })
}

fn row_to_term(r: &AnyRow) -> anyhow::Result<TermWindow> {
    Ok(TermWindow {
        listing_id: parse_uuid(r.get("listing_id"), "listing_id")?,
        term: r.get::<i64, _>("term"),
        start: from_unix(r.get("start_date"))?,
        end: from_unix(r.get("end_date"))?,
        upfront_price: r.get::<i64, _>("upfront_price"),
        units_sold: r.get::<i64, _>("units_sold"),
    })
}

fn parse_uuid(raw: String, column: &'static str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(&raw).with_context(|| format!("invalid {column}: '{raw}'"))
}

fn from_unix(secs: i64) -> anyhow::Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| anyhow!("timestamp out of range: {secs}"))
}

fn i64_to_u8(v: i64) -> anyhow::Result<u8> {
    u8::try_from(v).map_err(|_| anyhow!("out of range for u8: {v}"))
}
