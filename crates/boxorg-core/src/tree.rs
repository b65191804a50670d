//! Árbol de ubicaciones reconstruido en memoria a partir de una única lectura
//! plana de las filas de un workspace.
//!
//! El `parent_id` no se persiste: se deriva buscando la fila cuyo `path` es
//! `get_parent_path(path)`. Hijos directos y descendientes se resuelven con
//! comparaciones de prefijo sobre la misma lectura, nunca con consultas
//! adicionales.
use boxorg_domain::path::{get_parent_path, is_descendant_path, is_direct_child_path};
use boxorg_domain::{Location, LocationDto, LocationNode};
use indexmap::IndexMap;
use log::warn;
use uuid::Uuid;

pub struct LocationTree {
    // Ordenado por path: los padres siempre preceden a sus hijos.
    by_path: IndexMap<String, Location>,
}

impl LocationTree {
    /// Construye el árbol con las filas no borradas. Si dos filas comparten
    /// path (sólo posible por una carrera que el almacén no frenó) se
    /// conserva la más antigua.
    pub fn from_rows(rows: Vec<Location>) -> Self {
        let mut rows: Vec<Location> = rows.into_iter().filter(|l| !l.is_deleted).collect();
        rows.sort_by(|a, b| a.path.cmp(&b.path).then(a.created_at.cmp(&b.created_at)));
        let mut by_path: IndexMap<String, Location> = IndexMap::with_capacity(rows.len());
        for location in rows {
            if by_path.contains_key(&location.path) {
                warn!("duplicate location path ignored workspace_id={} path={} id={}",
                      location.workspace_id, location.path, location.id);
                continue;
            }
            by_path.insert(location.path.clone(), location);
        }
        Self { by_path }
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Location> {
        self.by_path.values()
    }

    pub fn get_by_path(&self, path: &str) -> Option<&Location> {
        self.by_path.get(path)
    }

    pub fn get_by_id(&self, id: Uuid) -> Option<&Location> {
        self.by_path.values().find(|l| l.id == id)
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.by_path.contains_key(path)
    }

    /// Padre derivado del path. `None` para el primer nivel y para filas
    /// huérfanas.
    pub fn parent_id_of(&self, location: &Location) -> Option<Uuid> {
        self.get_by_path(get_parent_path(&location.path)).map(|p| p.id)
    }

    pub fn to_dto(&self, location: &Location) -> LocationDto {
        location.to_dto(self.parent_id_of(location))
    }

    /// Ubicaciones de primer nivel (`root.<slug>`).
    pub fn roots(&self) -> Vec<&Location> {
        self.by_path.values().filter(|l| l.is_root_level()).collect()
    }

    /// Sólo hijos directos: `path + "." + <un segmento>`.
    pub fn children_of(&self, path: &str) -> Vec<&Location> {
        self.by_path.values().filter(|l| is_direct_child_path(&l.path, path)).collect()
    }

    /// Descendientes a cualquier profundidad: paths con prefijo `path + "."`.
    pub fn descendants_of(&self, path: &str) -> Vec<&Location> {
        self.by_path.values().filter(|l| is_descendant_path(&l.path, path)).collect()
    }

    /// Árbol anidado. Las filas cuyo padre no existe (huérfanas) se cuelgan
    /// del nivel superior para que sigan siendo visibles.
    pub fn nodes(&self) -> Vec<LocationNode> {
        let mut children: IndexMap<&str, Vec<&Location>> = IndexMap::new();
        let mut top: Vec<&Location> = Vec::new();
        for location in self.by_path.values() {
            let parent = get_parent_path(&location.path);
            if location.is_root_level() || !self.by_path.contains_key(parent) {
                top.push(location);
            } else {
                children.entry(parent).or_default().push(location);
            }
        }
        top.into_iter().map(|l| self.build_node(l, &children)).collect()
    }

    fn build_node(&self, location: &Location, children: &IndexMap<&str, Vec<&Location>>) -> LocationNode {
        let nested = children.get(location.path.as_str())
                             .map(|kids| kids.iter().map(|k| self.build_node(k, children)).collect())
                             .unwrap_or_default();
        LocationNode { location: self.to_dto(location),
                       children: nested }
    }
}
