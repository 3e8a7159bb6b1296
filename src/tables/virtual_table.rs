/// `Virtual`: no storage at all, computed entirely at read time from
/// other cache state. This table exists only so the Field Metadata Registry
/// and the Cache Controller's table map have a uniform entry for every
/// field name; all behavior lives in the corresponding `Field` impl.
#[derive(Debug, Default, Clone)]
pub struct VirtualTable {
    pub name: String,
}

impl VirtualTable {
    pub fn new(name: &str) -> Self {
        VirtualTable { name: name.to_string() }
    }
}
