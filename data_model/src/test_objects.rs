pub mod tests {
    use crate::{Property, Resource, ResourceBuilder};

    pub fn test_resource(alias: &str, id_values: &[&str]) -> Resource {
        let ids = id_values
            .iter()
            .enumerate()
            .map(|(i, v)| Property::new(format!("id_{}", i), *v))
            .collect();
        ResourceBuilder::default()
            .alias(alias.to_string())
            .ids(ids)
            .properties(vec![Property::new("body", "test body")])
            .build()
            .unwrap()
    }
}
