/// Data type for instruction operands (4-bit field).
///
/// For branch instructions, the "type" nibbles are really part of the branch
/// offset encoding and may hold values outside the known set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Double,
    Float,
    Int32,
    Int64,
    Bool,
    Variable,
    String,
    Int16,
    /// Raw 4-bit value not matching any known type (e.g. branch offset bits).
    Raw(u8),
}

impl DataType {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0x0 => Self::Double,
            0x1 => Self::Float,
            0x2 => Self::Int32,
            0x3 => Self::Int64,
            0x4 => Self::Bool,
            0x5 => Self::Variable,
            0x6 => Self::String,
            0xF => Self::Int16,
            _ => Self::Raw(v),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Double => 0x0,
            Self::Float => 0x1,
            Self::Int32 => 0x2,
            Self::Int64 => 0x3,
            Self::Bool => 0x4,
            Self::Variable => 0x5,
            Self::String => 0x6,
            Self::Int16 => 0xF,
            Self::Raw(v) => v,
        }
    }

    /// Size in bytes this type occupies on the VM stack.
    pub fn stack_size(self) -> u32 {
        match self {
            Self::Double | Self::Int64 => 8,
            Self::Variable => 16,
            _ => 4,
        }
    }

    /// Single-letter suffix used in disassembly (`push.v`, `conv.i.b`).
    pub fn suffix(self) -> char {
        match self {
            Self::Double => 'd',
            Self::Float => 'f',
            Self::Int32 => 'i',
            Self::Int64 => 'l',
            Self::Bool => 'b',
            Self::Variable => 'v',
            Self::String => 's',
            Self::Int16 => 'e',
            Self::Raw(_) => '?',
        }
    }

    pub fn from_suffix(c: char) -> Option<Self> {
        match c {
            'd' => Some(Self::Double),
            'f' => Some(Self::Float),
            'i' => Some(Self::Int32),
            'l' => Some(Self::Int64),
            'b' => Some(Self::Bool),
            'v' => Some(Self::Variable),
            's' => Some(Self::String),
            'e' => Some(Self::Int16),
            _ => None,
        }
    }
}

/// Comparison kind for Cmp instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ComparisonKind {
    Less = 1,
    LessEqual = 2,
    Equal = 3,
    NotEqual = 4,
    GreaterEqual = 5,
    Greater = 6,
}

impl ComparisonKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Less),
            2 => Some(Self::LessEqual),
            3 => Some(Self::Equal),
            4 => Some(Self::NotEqual),
            5 => Some(Self::GreaterEqual),
            6 => Some(Self::Greater),
            _ => None,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Less => "LT",
            Self::LessEqual => "LTE",
            Self::Equal => "EQ",
            Self::NotEqual => "NEQ",
            Self::GreaterEqual => "GTE",
            Self::Greater => "GT",
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<Self> {
        match s {
            "LT" => Some(Self::Less),
            "LTE" => Some(Self::LessEqual),
            "EQ" => Some(Self::Equal),
            "NEQ" => Some(Self::NotEqual),
            "GTE" => Some(Self::GreaterEqual),
            "GT" => Some(Self::Greater),
            _ => None,
        }
    }
}

/// Instance type for variable access.
///
/// Non-negative instance values are object indices and are kept as raw
/// `i16` in operands; only the negative sentinel values map to this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum InstanceType {
    /// Current instance (`self`).
    Own = -1,
    /// Other instance in collision event.
    Other = -2,
    /// All instances.
    All = -3,
    /// No instance.
    Noone = -4,
    /// Global scope.
    Global = -5,
    /// Built-in variable.
    Builtin = -6,
    /// Local scope.
    Local = -7,
    /// Instance taken from the stack (GMS2).
    Stacktop = -9,
    /// Argument variable.
    Arg = -15,
    /// Static variable (GMS2.3+).
    Static = -16,
}

impl InstanceType {
    pub fn from_i16(v: i16) -> Option<Self> {
        match v {
            -1 => Some(Self::Own),
            -2 => Some(Self::Other),
            -3 => Some(Self::All),
            -4 => Some(Self::Noone),
            -5 => Some(Self::Global),
            -6 => Some(Self::Builtin),
            -7 => Some(Self::Local),
            -9 => Some(Self::Stacktop),
            -15 => Some(Self::Arg),
            -16 => Some(Self::Static),
            _ => None,
        }
    }

    /// Keyword used for this instance type in source and in assembly listings.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Own => "self",
            Self::Other => "other",
            Self::All => "all",
            Self::Noone => "noone",
            Self::Global => "global",
            Self::Builtin => "builtin",
            Self::Local => "local",
            Self::Stacktop => "stacktop",
            Self::Arg => "arg",
            Self::Static => "static",
        }
    }

    pub fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "self" => Some(Self::Own),
            "other" => Some(Self::Other),
            "all" => Some(Self::All),
            "noone" => Some(Self::Noone),
            "global" => Some(Self::Global),
            "builtin" => Some(Self::Builtin),
            "local" => Some(Self::Local),
            "stacktop" => Some(Self::Stacktop),
            "arg" => Some(Self::Arg),
            "static" => Some(Self::Static),
            _ => None,
        }
    }
}

/// Reference type bits of a variable operand (top byte of the second word).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableType {
    /// Array access; index and instance are popped from the stack.
    Array,
    /// Instance is popped from the stack.
    StackTop,
    Normal,
    Instance,
    /// First dimension of a multi-dimensional array read.
    MultiPush,
    /// First dimension of a multi-dimensional array write.
    MultiPushPop,
    Raw(u8),
}

impl VariableType {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0x00 => Self::Array,
            0x80 => Self::StackTop,
            0xA0 => Self::Normal,
            0xE0 => Self::Instance,
            0x10 => Self::MultiPush,
            0x90 => Self::MultiPushPop,
            _ => Self::Raw(v),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Array => 0x00,
            Self::StackTop => 0x80,
            Self::Normal => 0xA0,
            Self::Instance => 0xE0,
            Self::MultiPush => 0x10,
            Self::MultiPushPop => 0x90,
            Self::Raw(v) => v,
        }
    }

    /// Prefix used in assembly listings (`[array]self.a`); empty for `Normal`.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Array => "[array]",
            Self::StackTop => "[stacktop]",
            Self::Normal | Self::Raw(_) => "",
            Self::Instance => "[instance]",
            Self::MultiPush => "[multipush]",
            Self::MultiPushPop => "[multipushpop]",
        }
    }

    pub fn from_prefix(s: &str) -> Option<Self> {
        match s {
            "array" => Some(Self::Array),
            "stacktop" => Some(Self::StackTop),
            "instance" => Some(Self::Instance),
            "multipush" => Some(Self::MultiPush),
            "multipushpop" => Some(Self::MultiPushPop),
            _ => None,
        }
    }

    /// Whether an index (and its instance) are taken from the stack.
    pub fn is_array(self) -> bool {
        matches!(self, Self::Array | Self::MultiPush | Self::MultiPushPop)
    }
}

/// Asset kinds addressable by `pushref` and by asset macro types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AssetType {
    Object,
    Sprite,
    Sound,
    Room,
    Background,
    Path,
    Script,
    Font,
    Timeline,
    Shader,
    Sequence,
    AnimCurve,
    ParticleSystem,
    RoomInstance,
}

/// Asset type codes as packed by `pushref` (high byte of the operand).
const ASSET_CODES: &[(AssetType, u8, &str)] = &[
    (AssetType::Object, 0, "Object"),
    (AssetType::Sprite, 1, "Sprite"),
    (AssetType::Sound, 2, "Sound"),
    (AssetType::Room, 3, "Room"),
    (AssetType::Background, 4, "Background"),
    (AssetType::Path, 5, "Path"),
    (AssetType::Script, 6, "Script"),
    (AssetType::Font, 7, "Font"),
    (AssetType::Timeline, 8, "Timeline"),
    (AssetType::Shader, 10, "Shader"),
    (AssetType::Sequence, 11, "Sequence"),
    (AssetType::AnimCurve, 12, "AnimCurve"),
    (AssetType::ParticleSystem, 13, "ParticleSystem"),
    (AssetType::RoomInstance, 14, "RoomInstance"),
];

impl AssetType {
    pub fn from_code(code: u8) -> Option<Self> {
        ASSET_CODES
            .iter()
            .find(|(_, c, _)| *c == code)
            .map(|(t, _, _)| *t)
    }

    pub fn code(self) -> u8 {
        ASSET_CODES
            .iter()
            .find(|(t, _, _)| *t == self)
            .map(|(_, c, _)| *c)
            .unwrap_or(0)
    }

    pub fn name(self) -> &'static str {
        ASSET_CODES
            .iter()
            .find(|(t, _, _)| *t == self)
            .map(|(_, _, n)| *n)
            .unwrap_or("Object")
    }

    pub fn from_name(s: &str) -> Option<Self> {
        ASSET_CODES
            .iter()
            .find(|(_, _, n)| *n == s)
            .map(|(t, _, _)| *t)
    }

    pub fn all() -> impl Iterator<Item = AssetType> {
        ASSET_CODES.iter().map(|(t, _, _)| *t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_sizes() {
        assert_eq!(DataType::Variable.stack_size(), 16);
        assert_eq!(DataType::Double.stack_size(), 8);
        assert_eq!(DataType::Int16.stack_size(), 4);
        assert_eq!(DataType::Int32.stack_size(), 4);
    }

    #[test]
    fn static_and_argument_instance_values() {
        assert_eq!(InstanceType::from_i16(-16), Some(InstanceType::Static));
        assert_eq!(InstanceType::from_i16(-15), Some(InstanceType::Arg));
        assert_eq!(InstanceType::from_i16(-8), None);
    }

    #[test]
    fn variable_type_prefixes() {
        assert_eq!(VariableType::from_u8(0xA0), VariableType::Normal);
        assert_eq!(VariableType::from_prefix("array"), Some(VariableType::Array));
        assert!(VariableType::MultiPushPop.is_array());
        assert!(!VariableType::StackTop.is_array());
    }
}
