// Generic formatting code for a set of data extracted from a data structure to be presented
// columnar or as csv, with or without a header.

use std::collections::HashMap;
use std::io;

/// Split `spec` on commas into the names known to `formatters` and everything else, both in the
/// order given.

pub fn parse_fields<'a, FmtT>(
    spec: &'a str,
    formatters: &HashMap<&'static str, FmtT>,
) -> (Vec<&'a str>, Vec<&'a str>) {
    let mut others = vec![];
    let mut fields = vec![];
    for x in spec.split(',').map(|x| x.trim()).filter(|x| !x.is_empty()) {
        if formatters.contains_key(x) {
            fields.push(x);
        } else {
            others.push(x);
        }
    }
    (fields, others)
}

/// The `fields` are the names of formatting functions to get from the `formatters`, these are
/// applied to the `data`.  Names not in `formatters` print as empty.  Set `header` to true to print
/// a first row with field names as a header (independent of csv).  Set `csv` to true to get CSV
/// output instead of fixed-format; values containing a comma, a quote or a newline are then quoted.

pub fn format_data<DataT, FmtT>(
    output: &mut dyn io::Write,
    fields: &[&str],
    formatters: &HashMap<&'static str, FmtT>,
    header: bool,
    csv: bool,
    data: &[DataT],
) -> io::Result<()>
where
    FmtT: Fn(&DataT) -> String,
{
    let fmts = fields
        .iter()
        .map(|f| formatters.get(*f))
        .collect::<Vec<_>>();
    let rows = data
        .iter()
        .map(|x| {
            fmts.iter()
                .map(|f| f.map(|f| f(x)).unwrap_or_default())
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    if csv {
        if header {
            writeln!(output, "{}", fields.iter().map(|f| csv_quote(f)).collect::<Vec<_>>().join(","))?;
        }
        for row in &rows {
            writeln!(output, "{}", row.iter().map(|f| csv_quote(f)).collect::<Vec<_>>().join(","))?;
        }
    } else {
        // The column width is the max across all the entries in the column (including header,
        // if present)
        let mut widths = vec![0; fields.len()];
        if header {
            for (w, kwd) in widths.iter_mut().zip(fields) {
                *w = usize::max(*w, kwd.len());
            }
        }
        for row in &rows {
            for (w, v) in widths.iter_mut().zip(row) {
                *w = usize::max(*w, v.len());
            }
        }

        if header {
            for (w, kwd) in widths.iter().zip(fields) {
                write!(output, "{:w$}  ", kwd, w = *w)?;
            }
            writeln!(output)?;
        }
        for row in &rows {
            for (w, v) in widths.iter().zip(row) {
                write!(output, "{:w$}  ", v, w = *w)?;
            }
            writeln!(output)?;
        }
    }
    Ok(())
}

fn csv_quote(s: &str) -> String {
    if s.contains(|c: char| c == ',' || c == '"' || c == '\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Datum {
        name: &'static str,
        value: f64,
    }

    fn formatters() -> HashMap<&'static str, fn(&Datum) -> String> {
        let mut m: HashMap<&'static str, fn(&Datum) -> String> = HashMap::new();
        m.insert("name", |d| d.name.to_string());
        m.insert("value", |d| d.value.to_string());
        m
    }

    #[test]
    fn test_parse_fields() {
        let f = formatters();
        let (fields, others) = parse_fields("name,bogus,value", &f);
        assert!(fields == vec!["name", "value"]);
        assert!(others == vec!["bogus"]);
    }

    #[test]
    fn test_fixed_width() {
        let data = [
            Datum { name: "idle", value: 7.0 },
            Datum { name: "allocated", value: 10.0 },
        ];
        let mut out = vec![];
        format_data(&mut out, &["name", "value"], &formatters(), true, false, &data[..]).unwrap();
        let s = String::from_utf8(out).unwrap();
        assert!(s == "name       value  \nidle       7      \nallocated  10     \n");
    }

    #[test]
    fn test_csv_quoting() {
        let data = [Datum { name: "gpu,a100", value: 1.5 }];
        let mut out = vec![];
        format_data(&mut out, &["name", "value"], &formatters(), false, true, &data[..]).unwrap();
        assert!(String::from_utf8(out).unwrap() == "\"gpu,a100\",1.5\n");
    }
}
