use rusqlite::Connection;

/// Initialise the evaluation tables. Safe to call on every startup.
pub fn init_eval_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS ml_recommendation (
            id               TEXT PRIMARY KEY,
            rec_type         TEXT NOT NULL,
            details          TEXT NOT NULL,
            status           TEXT NOT NULL DEFAULT 'PENDING',
            created_at       TEXT NOT NULL,
            approved_by      TEXT,
            approved_at      TEXT,
            rejected_by      TEXT,
            rejected_at      TEXT,
            rejection_reason TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_recommendation_status
            ON ml_recommendation(status, created_at);

        CREATE TABLE IF NOT EXISTS ml_evaluation_history (
            id                        TEXT PRIMARY KEY,
            eval_date                 TEXT NOT NULL,
            churned_count             INTEGER NOT NULL,
            with_score_count          INTEGER NOT NULL,
            recall_rate               REAL NOT NULL,
            coverage_rate             REAL NOT NULL,
            avg_churn_score           REAL NOT NULL,
            recommendations_generated INTEGER NOT NULL,
            notes                     TEXT
        );

        -- Rows written by the review dashboard; mined here for patterns.
        CREATE TABLE IF NOT EXISTS ml_classification_feedback (
            id               TEXT PRIMARY KEY,
            source_id        TEXT,
            ml_category      TEXT,
            correct_category TEXT,
            is_correct       INTEGER NOT NULL,
            created_at       TEXT NOT NULL
        );",
    )
}
