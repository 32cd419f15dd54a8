//! Wire grammar of the delta protocol.
//!
//! Inbound frames are `<tag><payload>` with tag `S` (schema), `T` (table
//! delta) or `H` (highlight delta). Outbound frames are `op:key=value,...`
//! control lines: a handshake, telemetry status and refresh requests.

use std::fmt;

use crate::codec;
use crate::error::{GridError, Result};
use crate::rows::RowId;
use crate::schema::Column;

/// How frames name their target table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addressing {
    /// Frames carry no address; everything goes to this one table.
    Fixed(String),
    /// The first `|` field of every frame is the table address.
    Addressed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Schema { address: String, columns: Vec<Column> },
    Table(DeltaFrame),
    Highlight(DeltaFrame),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaFrame {
    pub sequence: Option<String>,
    pub address: String,
    pub changes: Vec<PendingChange>,
    /// Byte length of the payload after the sequence header.
    pub payload_len: usize,
}

/// One row's cell writes, alive only while its frame is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    pub index: RowId,
    pub cells: Vec<CellChange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellChange {
    pub column: usize,
    pub value: String,
}

pub fn decode_frame(frame: &str, addressing: &Addressing) -> Result<InboundFrame> {
    let mut chars = frame.chars();
    let tag = chars
        .next()
        .ok_or_else(|| GridError::malformed("empty frame"))?;
    let payload = chars.as_str();

    match tag {
        'S' => decode_schema(payload, addressing),
        'T' => decode_delta(payload, addressing).map(InboundFrame::Table),
        'H' => decode_delta(payload, addressing).map(InboundFrame::Highlight),
        other => Err(GridError::UnknownFrameTag { tag: other }),
    }
}

fn decode_schema(payload: &str, addressing: &Addressing) -> Result<InboundFrame> {
    let mut parts = payload.split('|');
    let address = take_address(&mut parts, addressing)?;
    let columns = parts
        .filter(|part| !part.is_empty())
        .map(Column::parse)
        .collect::<Result<Vec<_>>>()?;

    Ok(InboundFrame::Schema { address, columns })
}

fn decode_delta(payload: &str, addressing: &Addressing) -> Result<DeltaFrame> {
    let (sequence, body) = split_sequence(payload, addressing);
    let mut parts = body.split('|');
    let address = take_address(&mut parts, addressing)?;
    let changes = parts
        .filter(|part| !part.is_empty())
        .map(parse_change)
        .collect::<Result<Vec<_>>>()?;

    Ok(DeltaFrame {
        sequence: sequence.map(str::to_string),
        address,
        changes,
        payload_len: body.len(),
    })
}

fn take_address<'a>(
    parts: &mut impl Iterator<Item = &'a str>,
    addressing: &Addressing,
) -> Result<String> {
    match addressing {
        Addressing::Fixed(name) => Ok(name.clone()),
        Addressing::Addressed => parts
            .next()
            .filter(|address| !address.is_empty())
            .map(str::to_string)
            .ok_or_else(|| GridError::malformed("frame without table address")),
    }
}

/// Splits an optional `sequence:` header off a delta payload.
///
/// A sequence is digits, optionally followed by `@` and a send timestamp.
/// With addressed frames anything before the first `:` that contains no `|`
/// is a header. Fixed-table frames start with a row index that looks the
/// same, so there the prefix is a header only when the text after it still
/// starts with a complete `row:` field.
fn split_sequence<'a>(payload: &'a str, addressing: &Addressing) -> (Option<&'a str>, &'a str) {
    let Some((head, rest)) = payload.split_once(':') else {
        return (None, payload);
    };

    if !is_sequence(head) {
        return (None, payload);
    }

    let is_header = match addressing {
        Addressing::Addressed => true,
        Addressing::Fixed(_) => {
            let first_field = rest.split('|').next().unwrap_or_default();
            let before_cells = first_field.split('=').next().unwrap_or_default();
            before_cells.contains(':')
        }
    };

    if is_header {
        (Some(head), rest)
    } else {
        (None, payload)
    }
}

fn is_sequence(head: &str) -> bool {
    let (count, stamp) = head.split_once('@').unwrap_or((head, "0"));
    let all_digits = |text: &str| !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit());
    all_digits(count) && all_digits(stamp)
}

fn parse_change(field: &str) -> Result<PendingChange> {
    let (raw_index, cells) = field
        .split_once(':')
        .ok_or_else(|| GridError::malformed(format!("row field without ':': {field:?}")))?;

    let index = raw_index
        .trim()
        .parse::<RowId>()
        .map_err(|_| GridError::InvalidRowIndex {
            raw: raw_index.to_string(),
        })?;

    let cells = cells
        .split(',')
        .filter(|cell| !cell.is_empty())
        .map(parse_cell)
        .collect::<Result<Vec<_>>>()?;

    Ok(PendingChange { index, cells })
}

fn parse_cell(cell: &str) -> Result<CellChange> {
    let (column, token) = cell
        .split_once('=')
        .ok_or_else(|| GridError::malformed(format!("cell without '=': {cell:?}")))?;

    let column = column
        .trim()
        .parse::<usize>()
        .map_err(|_| GridError::malformed(format!("invalid column index {column:?}")))?;

    Ok(CellChange {
        column,
        value: codec::decode(token),
    })
}

/// Label attached to every status frame naming what produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Open,
    Error,
    Close,
    UpdateTable,
    HighlightTable,
}

impl Operation {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Error => "error",
            Self::Close => "close",
            Self::UpdateTable => "updateTable",
            Self::HighlightTable => "highlightTable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    SchemaUpdate,
    ReconcileFailure,
    UndeclaredColumn,
    MalformedFrame,
}

impl RefreshReason {
    pub const fn label(self) -> &'static str {
        match self {
            Self::SchemaUpdate => "schemaUpdate",
            Self::ReconcileFailure => "reconcileFailure",
            Self::UndeclaredColumn => "undeclaredColumn",
            Self::MalformedFrame => "malformedFrame",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub rows: usize,
    pub delta: usize,
    pub change: usize,
    pub duration_ms: u64,
    pub sequence: String,
    pub operation: Operation,
    pub address: String,
    pub user: String,
}

impl StatusReport {
    /// All-zero report sent on connection state changes.
    pub fn idle(operation: Operation, user: &str) -> Self {
        Self {
            rows: 0,
            delta: 0,
            change: 0,
            duration_ms: 0,
            sequence: "0".to_string(),
            operation,
            address: String::new(),
            user: user.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Connect { target: String },
    Status(StatusReport),
    Refresh(RefreshReason),
}

impl OutboundFrame {
    /// Telemetry may be dropped under back-pressure; control frames may not.
    pub fn is_droppable(&self) -> bool {
        matches!(self, Self::Status(_))
    }
}

impl fmt::Display for OutboundFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect { target } => write!(f, "connect:{target}"),
            Self::Status(status) => write!(
                f,
                "status:rows={},delta={},change={},duration={},sequence={},method={},address={},user={}",
                status.rows,
                status.delta,
                status.change,
                status.duration_ms,
                status.sequence,
                status.operation.label(),
                status.address,
                status.user
            ),
            Self::Refresh(reason) => {
                write!(f, "refresh:everything=true,message={}", reason.label())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_hex, encode_literal};

    fn fixed() -> Addressing {
        Addressing::Fixed("mainGrid".to_string())
    }

    fn table(frame: &str, addressing: &Addressing) -> DeltaFrame {
        match decode_frame(frame, addressing).expect("decode frame") {
            InboundFrame::Table(delta) => delta,
            other => panic!("expected table delta, got {other:?}"),
        }
    }

    #[test]
    fn decodes_fixed_table_delta() {
        let delta = table("T0:0=<48656c6c6f", &fixed());

        assert_eq!(delta.sequence, None);
        assert_eq!(delta.address, "mainGrid");
        assert_eq!(
            delta.changes,
            vec![PendingChange {
                index: 0,
                cells: vec![CellChange {
                    column: 0,
                    value: "Hello".to_string()
                }],
            }]
        );
        assert_eq!(delta.payload_len, "0:0=<48656c6c6f".len());
    }

    #[test]
    fn fixed_sequence_header_needs_a_following_row() {
        let delta = table("T7:3:1=>a,2=>b|4:0=>c", &fixed());
        assert_eq!(delta.sequence.as_deref(), Some("7"));
        assert_eq!(delta.changes.len(), 2);
        assert_eq!(delta.changes[0].index, 3);
        assert_eq!(delta.changes[0].cells[1].value, "b");
        assert_eq!(delta.changes[1].index, 4);

        let delta = table("T3:1=>a|4:0=>c", &fixed());
        assert_eq!(delta.sequence, None);
        assert_eq!(delta.changes[0].index, 3);
    }

    #[test]
    fn addressed_delta_with_timestamped_sequence() {
        let delta = table("T12@1700000000000:prices|0:0=>x|2:1=>y", &Addressing::Addressed);

        assert_eq!(delta.sequence.as_deref(), Some("12@1700000000000"));
        assert_eq!(delta.address, "prices");
        assert_eq!(delta.changes.len(), 2);
        assert_eq!(delta.changes[1].index, 2);
        assert_eq!(delta.changes[1].cells[0].column, 1);
    }

    #[test]
    fn addressed_delta_without_sequence() {
        let delta = table("Tprices|5:0=>x", &Addressing::Addressed);

        assert_eq!(delta.sequence, None);
        assert_eq!(delta.address, "prices");
        assert_eq!(delta.changes[0].index, 5);
    }

    #[test]
    fn literal_values_may_contain_colons() {
        let delta = table("T0:0=>12:30", &fixed());
        assert_eq!(delta.changes[0].cells[0].value, "12:30");
    }

    #[test]
    fn decodes_highlight_delta() {
        let style = encode_hex("background-color: #32cd32;");
        let frame = format!("H1:2={style}");

        match decode_frame(&frame, &fixed()).expect("decode highlight") {
            InboundFrame::Highlight(delta) => {
                assert_eq!(delta.changes[0].index, 1);
                assert_eq!(delta.changes[0].cells[0].value, "background-color: #32cd32;");
            }
            other => panic!("expected highlight, got {other:?}"),
        }
    }

    #[test]
    fn decodes_addressed_schema() {
        let frame = format!(
            "Sprices|name,{},{},{},true,true,false|bid,{},{},{},false,true,false,80",
            encode_literal("Name"),
            encode_hex("{name}"),
            encode_literal(""),
            encode_literal("Bid"),
            encode_hex("{bid}"),
            encode_hex("color: {tint};"),
        );

        match decode_frame(&frame, &Addressing::Addressed).expect("decode schema") {
            InboundFrame::Schema { address, columns } => {
                assert_eq!(address, "prices");
                assert_eq!(columns.len(), 2);
                assert_eq!(columns[0].template, "{name}");
                assert_eq!(columns[1].width, Some(80));
                assert_eq!(columns[1].style, "color: {tint};");
            }
            other => panic!("expected schema, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_tag_and_bad_rows() {
        assert!(matches!(
            decode_frame("Xabc", &fixed()),
            Err(GridError::UnknownFrameTag { tag: 'X' })
        ));
        assert!(matches!(
            decode_frame("Tx:0=>a", &fixed()),
            Err(GridError::InvalidRowIndex { .. })
        ));
        assert!(matches!(
            decode_frame("T0:0", &fixed()),
            Err(GridError::MalformedFrame { .. })
        ));
        assert!(matches!(
            decode_frame("", &fixed()),
            Err(GridError::MalformedFrame { .. })
        ));
        assert!(matches!(
            decode_frame("T|0:0=>a", &Addressing::Addressed),
            Err(GridError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn encodes_outbound_frames() {
        let mut status = StatusReport::idle(Operation::UpdateTable, "alice");
        status.rows = 4;
        status.delta = 17;
        status.change = 3;
        status.duration_ms = 2;
        status.sequence = "9".to_string();
        status.address = "prices".to_string();

        assert_eq!(
            OutboundFrame::Status(status).to_string(),
            "status:rows=4,delta=17,change=3,duration=2,sequence=9,method=updateTable,address=prices,user=alice"
        );
        assert_eq!(
            OutboundFrame::Refresh(RefreshReason::ReconcileFailure).to_string(),
            "refresh:everything=true,message=reconcileFailure"
        );
        assert_eq!(
            OutboundFrame::Refresh(RefreshReason::SchemaUpdate).to_string(),
            "refresh:everything=true,message=schemaUpdate"
        );
    }
}
