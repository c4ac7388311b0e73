use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Reservations: one row per provider id, never deleted.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS reservations (
  reservation_id TEXT PRIMARY KEY,
  region TEXT NOT NULL,
  scope TEXT NOT NULL,
  az TEXT NOT NULL,
  instance_type TEXT NOT NULL,
  instance_family TEXT NOT NULL,
  units REAL NOT NULL,
  offer_class TEXT NOT NULL,
  offer_type TEXT NOT NULL,
  product TEXT NOT NULL,
  tenancy TEXT NOT NULL,
  state TEXT NOT NULL,
  duration_secs BIGINT NOT NULL,
  start_date BIGINT NOT NULL,
  end_date BIGINT NOT NULL,
  original_end_date BIGINT,
  instance_count BIGINT NOT NULL,
  upfront_price BIGINT NOT NULL,
  recurring_charges BIGINT NOT NULL,
  effective_price BIGINT NOT NULL,
  lifecycle INTEGER NOT NULL,
  listed_on TEXT NOT NULL,
  created_at BIGINT NOT NULL,
  updated_at BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Lineage edges
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS reservations_relations (
  parent_id TEXT NOT NULL,
  child_id TEXT NOT NULL,
  created_at BIGINT NOT NULL,
  PRIMARY KEY (parent_id, child_id)
);
"#,
    )
    .execute(pool)
    .await?;

    // Listings
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS reservations_listings (
  listing_id TEXT PRIMARY KEY,
  reservation_id TEXT NOT NULL,
  region TEXT NOT NULL,
  scope TEXT NOT NULL,
  az TEXT NOT NULL,
  instance_type TEXT NOT NULL,
  instance_family TEXT NOT NULL,
  units REAL NOT NULL,
  product TEXT NOT NULL,
  published_at BIGINT NOT NULL,
  status TEXT NOT NULL,
  status_message TEXT NOT NULL,
  available BIGINT NOT NULL,
  sold BIGINT NOT NULL,
  cancelled BIGINT NOT NULL,
  pending BIGINT NOT NULL,
  created_at BIGINT NOT NULL,
  updated_at BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Listing term windows
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS reservations_listings_terms (
  listing_id TEXT NOT NULL,
  start_date BIGINT NOT NULL,
  end_date BIGINT NOT NULL,
  term BIGINT NOT NULL,
  upfront_price BIGINT NOT NULL,
  units_sold BIGINT NOT NULL,
  created_at BIGINT NOT NULL,
  updated_at BIGINT NOT NULL,
  PRIMARY KEY (listing_id, start_date),
  CHECK (end_date > start_date)
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_reservations_family ON reservations(region, duration_secs, offer_class);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_reservations_start ON reservations(start_date);"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_reservations_end ON reservations(end_date);"#)
        .execute(pool)
        .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_relations_child ON reservations_relations(child_id);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_listings_reservation ON reservations_listings(reservation_id);"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
