//! Protocol operator enumeration.
//!
//! One variant per wire `type_code`. Values match the real protocol's
//! `TermType` numbering exactly (spec end-to-end scenarios pin ADD=24,
//! MAKE_ARRAY=2, MAP=38, FUNC=69; the rest follow the same enumeration).

#![allow(non_camel_case_types)]

/// A protocol operator code. `Term::Operator` always carries one of these;
/// `Datum` never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TermType {
    Datum = 1,
    MakeArray = 2,
    MakeObj = 3,
    Var = 10,
    JavaScript = 11,
    Uuid = 169,
    Http = 153,
    Error = 12,
    Implicit = 13,
    Db = 14,
    Table = 15,
    Get = 16,
    GetAll = 78,
    Eq = 17,
    Ne = 18,
    Lt = 19,
    Le = 20,
    Gt = 21,
    Ge = 22,
    Not = 23,
    Add = 24,
    Sub = 25,
    Mul = 26,
    Div = 27,
    Mod = 28,
    Append = 29,
    Prepend = 80,
    Difference = 95,
    SetInsert = 88,
    SetIntersection = 89,
    SetUnion = 90,
    SetDifference = 91,
    Slice = 30,
    Skip = 70,
    Limit = 71,
    GetField = 31,
    Keys = 94,
    Values = 186,
    Object = 143,
    HasFields = 32,
    WithFields = 96,
    Pluck = 33,
    Without = 34,
    Merge = 35,
    Between = 36,
    Reduce = 37,
    Map = 38,
    Filter = 39,
    ConcatMap = 40,
    OrderBy = 41,
    Distinct = 42,
    Count = 43,
    Union = 44,
    Nth = 45,
    Match = 97,
    Split = 149,
    Upcase = 141,
    Downcase = 142,
    IsEmpty = 86,
    GroupedMapReduce = 46,
    InnerJoin = 48,
    OuterJoin = 49,
    EqJoin = 50,
    Zip = 72,
    InsertAt = 82,
    DeleteAt = 83,
    ChangeAt = 84,
    SpliceAt = 85,
    CoerceTo = 51,
    TypeOf = 52,
    Update = 53,
    Delete = 54,
    Replace = 55,
    Insert = 56,
    DbCreate = 57,
    DbDrop = 58,
    DbList = 59,
    TableCreate = 60,
    TableDrop = 61,
    TableList = 62,
    Sync = 138,
    IndexCreate = 75,
    IndexDrop = 76,
    IndexList = 77,
    IndexStatus = 139,
    IndexWait = 140,
    IndexRename = 156,
    Funcall = 64,
    Branch = 65,
    Or = 66,
    And = 67,
    ForEach = 68,
    Func = 69,
    Asc = 73,
    Desc = 74,
    Info = 79,
    Sample = 81,
    Default = 92,
    Json = 98,
    ToJsonString = 172,
    Iso8601 = 99,
    ToIso8601 = 100,
    EpochTime = 101,
    ToEpochTime = 102,
    Now = 103,
    InTimezone = 104,
    During = 105,
    Date = 106,
    TimeOfDay = 126,
    Timezone = 127,
    Time = 136,
    Year = 128,
    Month = 129,
    Day = 130,
    DayOfWeek = 131,
    DayOfYear = 132,
    Hours = 133,
    Minutes = 134,
    Seconds = 135,
    Literal = 137,
    Group = 144,
    Sum = 145,
    Avg = 146,
    Min = 147,
    Max = 148,
    Bracket = 170,
    Args = 154,
    Binary = 155,
    GeoJson = 157,
    ToGeoJson = 158,
    Point = 159,
    Line = 160,
    Polygon = 161,
    Distance = 162,
    Intersects = 163,
    Includes = 164,
    Circle = 165,
    GetIntersecting = 166,
    Fill = 167,
    GetNearest = 168,
    PolygonSub = 171,
    Contains = 93,
    Changes = 152,
    NoreplyWait = 177,
    MonoDown = 199,
    MonoUp = 200,
    Fold = 187,
}

impl TermType {
    /// Operator render style for the pretty printer (spec §4.1).
    pub fn render_style(self) -> RenderStyle {
        use TermType::*;
        match self {
            Add | Sub | Mul | Div | Mod | Eq | Ne | Lt | Le | Gt | Ge | And | Or => {
                RenderStyle::Infix
            }
            GetField | Bracket => RenderStyle::BracketIndex,
            MakeArray => RenderStyle::ArrayLiteral,
            Func | Var => RenderStyle::Internal,
            _ => RenderStyle::MethodCall,
        }
    }

    /// The lowercase method-style name used when rendering a `MethodCall`
    /// or as a fallback label for unknown operators (`r.<name>(...)`).
    pub fn name(self) -> &'static str {
        use TermType::*;
        match self {
            Datum => "datum",
            MakeArray => "make_array",
            MakeObj => "make_obj",
            Var => "var",
            JavaScript => "js",
            Uuid => "uuid",
            Http => "http",
            Error => "error",
            Implicit => "row",
            Db => "db",
            Table => "table",
            Get => "get",
            GetAll => "get_all",
            Eq => "eq",
            Ne => "ne",
            Lt => "lt",
            Le => "le",
            Gt => "gt",
            Ge => "ge",
            Not => "not",
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            Div => "div",
            Mod => "mod",
            Append => "append",
            Prepend => "prepend",
            Difference => "difference",
            SetInsert => "set_insert",
            SetIntersection => "set_intersection",
            SetUnion => "set_union",
            SetDifference => "set_difference",
            Slice => "slice",
            Skip => "skip",
            Limit => "limit",
            GetField => "get_field",
            Keys => "keys",
            Values => "values",
            Object => "object",
            HasFields => "has_fields",
            WithFields => "with_fields",
            Pluck => "pluck",
            Without => "without",
            Merge => "merge",
            Between => "between",
            Reduce => "reduce",
            Map => "map",
            Filter => "filter",
            ConcatMap => "concat_map",
            OrderBy => "order_by",
            Distinct => "distinct",
            Count => "count",
            Union => "union",
            Nth => "nth",
            Match => "match",
            Split => "split",
            Upcase => "upcase",
            Downcase => "downcase",
            IsEmpty => "is_empty",
            GroupedMapReduce => "grouped_map_reduce",
            InnerJoin => "inner_join",
            OuterJoin => "outer_join",
            EqJoin => "eq_join",
            Zip => "zip",
            InsertAt => "insert_at",
            DeleteAt => "delete_at",
            ChangeAt => "change_at",
            SpliceAt => "splice_at",
            CoerceTo => "coerce_to",
            TypeOf => "type_of",
            Update => "update",
            Delete => "delete",
            Replace => "replace",
            Insert => "insert",
            DbCreate => "db_create",
            DbDrop => "db_drop",
            DbList => "db_list",
            TableCreate => "table_create",
            TableDrop => "table_drop",
            TableList => "table_list",
            Sync => "sync",
            IndexCreate => "index_create",
            IndexDrop => "index_drop",
            IndexList => "index_list",
            IndexStatus => "index_status",
            IndexWait => "index_wait",
            IndexRename => "index_rename",
            Funcall => "do",
            Branch => "branch",
            Or => "or",
            And => "and",
            ForEach => "for_each",
            Func => "func",
            Asc => "asc",
            Desc => "desc",
            Info => "info",
            Sample => "sample",
            Default => "default",
            Json => "json",
            ToJsonString => "to_json_string",
            Iso8601 => "iso8601",
            ToIso8601 => "to_iso8601",
            EpochTime => "epoch_time",
            ToEpochTime => "to_epoch_time",
            Now => "now",
            InTimezone => "in_timezone",
            During => "during",
            Date => "date",
            TimeOfDay => "time_of_day",
            Timezone => "timezone",
            Time => "time",
            Year => "year",
            Month => "month",
            Day => "day",
            DayOfWeek => "day_of_week",
            DayOfYear => "day_of_year",
            Hours => "hours",
            Minutes => "minutes",
            Seconds => "seconds",
            Literal => "literal",
            Group => "group",
            Sum => "sum",
            Avg => "avg",
            Min => "min",
            Max => "max",
            Bracket => "bracket",
            Args => "args",
            Binary => "binary",
            GeoJson => "geojson",
            ToGeoJson => "to_geojson",
            Point => "point",
            Line => "line",
            Polygon => "polygon",
            Distance => "distance",
            Intersects => "intersects",
            Includes => "includes",
            Circle => "circle",
            GetIntersecting => "get_intersecting",
            Fill => "fill",
            GetNearest => "get_nearest",
            PolygonSub => "polygon_sub",
            Contains => "contains",
            Changes => "changes",
            NoreplyWait => "noreply_wait",
            MonoDown => "asc",
            MonoUp => "desc",
            Fold => "fold",
        }
    }
}

/// How the pretty printer renders an operator term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStyle {
    Infix,
    BracketIndex,
    ArrayLiteral,
    MethodCall,
    /// `Func`/`Var` nodes never appear directly in user-facing pretty
    /// printing; they are rendered as part of their parent lambda.
    Internal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinned_codes_match_spec_literals() {
        assert_eq!(TermType::Add as i32, 24);
        assert_eq!(TermType::MakeArray as i32, 2);
        assert_eq!(TermType::Map as i32, 38);
        assert_eq!(TermType::Func as i32, 69);
    }
}
