use qwed_dsl::ValueSort;

/// SMT sorts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SmtSort {
    Bool,
    Int,
    Real,
    String,
    /// `(Array index element)`.
    Array(Box<SmtSort>, Box<SmtSort>),
}

impl SmtSort {
    pub fn int_array(element: SmtSort) -> Self {
        SmtSort::Array(Box::new(SmtSort::Int), Box::new(element))
    }
}

impl From<&ValueSort> for SmtSort {
    fn from(sort: &ValueSort) -> Self {
        match sort {
            ValueSort::Bool => SmtSort::Bool,
            ValueSort::Int => SmtSort::Int,
            ValueSort::Real => SmtSort::Real,
            ValueSort::Str => SmtSort::String,
            ValueSort::Array(elem) => SmtSort::int_array(SmtSort::from(elem.as_ref())),
        }
    }
}

impl std::fmt::Display for SmtSort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SmtSort::Bool => write!(f, "Bool"),
            SmtSort::Int => write!(f, "Int"),
            SmtSort::Real => write!(f, "Real"),
            SmtSort::String => write!(f, "String"),
            SmtSort::Array(index, elem) => write!(f, "(Array {index} {elem})"),
        }
    }
}
