use convey_core::catalog::SourceEntry;
use rusqlite::params_from_iter;
use tracing::debug;

use crate::error::Result;
use crate::store::Store;

/// How the collector should approach the source table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Use the catalog's index hint (hot path).
    Hot,
    /// Force a full scan (backfill bulk phase).
    FullScan,
}

/// One unprocessed conversation id with its earliest fragment time.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub source_id: String,
    pub time: Option<String>,
}

/// One source row, text capped to its 4000-byte prefix.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub channel: Option<String>,
    pub text: Option<String>,
    pub timestamp: Option<String>,
    pub ban: Option<String>,
    pub subscriber_no: Option<String>,
}

/// Header fields denormalized into the destination summary.
#[derive(Debug, Clone)]
pub struct SourceHeader {
    pub ban: Option<String>,
    pub subscriber_no: Option<String>,
    pub conversation_time: Option<String>,
}

fn from_clause(entry: &SourceEntry, scan: ScanMode) -> String {
    match scan {
        ScanMode::Hot => entry.table_clause(),
        ScanMode::FullScan => format!("src.{} NOT INDEXED", entry.table),
    }
}

impl Store {
    /// Collect up to `batch` unprocessed conversation ids inside the window
    /// `(window_start, window_end]`, earliest first. Ids already in the
    /// processed set (within `processed_window_start`) are excluded in SQL so
    /// the batch never contains known work.
    pub fn collect_candidates(
        &self,
        entry: &SourceEntry,
        window_start: &str,
        window_end: Option<&str>,
        processed_window_start: &str,
        batch: u32,
        scan: ScanMode,
    ) -> Result<Vec<Candidate>> {
        let mut sql = format!(
            "SELECT {id}, MIN({time}) AS first_time FROM {from} WHERE {time} > ?",
            id = entry.id_column,
            time = entry.time_column,
            from = from_clause(entry, scan),
        );
        let mut params: Vec<String> = vec![window_start.to_string()];

        if let Some(end) = window_end {
            sql.push_str(&format!(" AND {} <= ?", entry.time_column));
            params.push(end.to_string());
        }
        if let Some(filter) = &entry.base_filter {
            sql.push_str(&format!(" AND ({filter})"));
        }
        sql.push_str(&format!(
            " AND {id} NOT IN (SELECT source_id FROM cdc_processed_ids WHERE fragment_time > ?)
              GROUP BY {id} ORDER BY first_time ASC LIMIT {batch}",
            id = entry.id_column,
        ));
        params.push(processed_window_start.to_string());

        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows: Vec<Candidate> = stmt
                .query_map(params_from_iter(params.iter()), |row| {
                    Ok(Candidate {
                        source_id: row.get(0)?,
                        time: row.get(1)?,
                    })
                })?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })?;

        debug!(source = %entry.key, count = rows.len(), "collected candidates");
        Ok(rows)
    }

    /// All fragments of one conversation id, fragment-time ascending with
    /// physical insertion order breaking ties.
    pub fn fetch_fragments(&self, entry: &SourceEntry, source_id: &str) -> Result<Vec<Fragment>> {
        let sql = format!(
            "SELECT {channel}, substr({text}, 1, 4000), {ftime}, {ban}, {sub}
             FROM src.{table}
             WHERE {id} = ?1
             ORDER BY {ftime} ASC, rowid ASC",
            channel = entry.channel_column,
            text = entry.text_column,
            ftime = entry.fragment_time_column,
            ban = entry.account_column,
            sub = entry.subscriber_column,
            table = entry.table,
            id = entry.id_column,
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows: Vec<Fragment> = stmt
                .query_map([source_id], |row| {
                    Ok(Fragment {
                        channel: row.get(0)?,
                        text: row.get(1)?,
                        timestamp: row.get(2)?,
                        ban: row.get(3)?,
                        subscriber_no: row.get(4)?,
                    })
                })?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
    }

    /// First-fragment header for denormalizing destination rows. `None` when
    /// the id no longer exists in the source table.
    pub fn source_header(
        &self,
        entry: &SourceEntry,
        source_id: &str,
    ) -> Result<Option<SourceHeader>> {
        let sql = format!(
            "SELECT {ban}, {sub}, {ftime}
             FROM src.{table}
             WHERE {id} = ?1
             ORDER BY {ftime} ASC, rowid ASC
             LIMIT 1",
            ban = entry.account_column,
            sub = entry.subscriber_column,
            ftime = entry.fragment_time_column,
            table = entry.table,
            id = entry.id_column,
        );
        self.with_conn(|conn| {
            match conn.query_row(&sql, [source_id], |row| {
                Ok(SourceHeader {
                    ban: row.get(0)?,
                    subscriber_no: row.get(1)?,
                    conversation_time: row.get(2)?,
                })
            }) {
                Ok(h) => Ok(Some(h)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    /// Whole-conversation text, space-joined, for pattern mining.
    pub fn transcript(&self, entry: &SourceEntry, source_id: &str) -> Result<String> {
        let fragments = self.fetch_fragments(entry, source_id)?;
        Ok(fragments
            .iter()
            .filter_map(|f| f.text.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" "))
    }
}
