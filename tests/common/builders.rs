//! Test data builders for creating test objects

use mini_scada::{Area, DataType, TagSpec};

/// Builder for creating test TagSpecs
pub struct TagBuilder {
    name: String,
    area: Area,
    block: u16,
    byte: usize,
    bit: Option<u8>,
    data_type: DataType,
}

impl TagBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            area: Area::DataBlock,
            block: 1,
            byte: 0,
            bit: None,
            data_type: DataType::Int16,
        }
    }

    pub fn area(mut self, area: Area) -> Self {
        self.area = area;
        self
    }

    pub fn block(mut self, block: u16) -> Self {
        self.block = block;
        self
    }

    pub fn byte(mut self, byte: usize) -> Self {
        self.byte = byte;
        self
    }

    pub fn bit(mut self, bit: u8) -> Self {
        self.bit = Some(bit);
        self.data_type = DataType::Bool;
        self
    }

    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn build(self) -> TagSpec {
        TagSpec::from_parts(
            self.name,
            self.area,
            self.block,
            self.byte,
            self.bit,
            self.data_type,
        )
        .unwrap()
    }
}

/// `TankLevel` REAL32 at DB1.DBD0 and `PumpOn` BOOL at DB1.DBX4.0
pub fn tank_tags() -> Vec<TagSpec> {
    vec![
        TagBuilder::new("TankLevel")
            .data_type(DataType::Real32)
            .build(),
        TagBuilder::new("PumpOn").byte(4).bit(0).build(),
    ]
}

/// `count` INT16 tags `t0..` packed back to back in DB1
pub fn int_tags(count: usize) -> Vec<TagSpec> {
    (0..count)
        .map(|i| TagBuilder::new(&format!("t{}", i)).byte(i * 2).build())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_builder() {
        let tag = TagBuilder::new("test")
            .area(Area::Marker)
            .byte(10)
            .data_type(DataType::Word)
            .build();

        assert_eq!(tag.name(), "test");
        assert_eq!(tag.address(), "MW10");
    }
}
