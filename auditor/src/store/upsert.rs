//! `INSERT .. ON CONFLICT` statements with an explicit conflict target and
//! an explicit list of columns overwritten on conflict. Every other column
//! keeps the value of the existing row.

#[derive(Clone, Copy, Debug)]
pub struct Upsert<'a> {
    pub table: &'a str,
    pub columns: &'a [&'a str],
    pub conflict: &'a [&'a str],
    pub overwrite: &'a [&'a str],
}

impl Upsert<'_> {
    pub fn sql(&self) -> String {
        let placeholders = vec!["?"; self.columns.len()].join(", ");
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) ",
            self.table,
            self.columns.join(", "),
            placeholders,
            self.conflict.join(", "),
        );

        if self.overwrite.is_empty() {
            sql.push_str("DO NOTHING");
        } else {
            let sets: Vec<String> = self
                .overwrite
                .iter()
                .map(|c| format!("{c} = excluded.{c}"))
                .collect();
            sql.push_str("DO UPDATE SET ");
            sql.push_str(&sets.join(", "));
        }
        sql
    }
}
